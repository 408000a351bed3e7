// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use thiserror::Error;

/// Operational failures surfaced by the config registry.
///
/// Type mismatches and parse failures are logged through `rt-log` at the
/// point they occur (so the log line has the offending name/text at hand)
/// in addition to being returned here.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid config name {0:?}: must match [a-z0-9._]+")]
    InvalidName(String),

    #[error("config variable {0:?} exists with a different type")]
    TypeMismatch(String),

    #[error("could not parse {text:?} as the value type of {name:?}")]
    ParseFailure { name: String, text: String },
}
