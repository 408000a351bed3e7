// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::time::Instant;

use once_cell::sync::Lazy;

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// The instant the process (or at least this crate) first observed time.
///
/// Used as the epoch for `LogEvent`'s elapsed-since-start field.
pub fn process_start() -> Instant {
    *PROCESS_START
}

/// Milliseconds elapsed since [`process_start`].
pub fn elapsed_since_start() -> u64 {
    Instant::now()
        .saturating_duration_since(*PROCESS_START)
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
