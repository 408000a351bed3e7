// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::Level;

/// A single log occurrence, carrying everything a [`crate::Formatter`] might
/// need to render a line.
pub struct LogEvent {
    pub level: Level,
    pub file: &'static str,
    pub line: u32,
    pub message: String,
    pub elapsed_ms: u64,
    pub thread_id: u64,
    pub thread_name: String,
    pub fiber_id: u64,
    pub timestamp: std::time::SystemTime,
}

impl LogEvent {
    pub fn new(level: Level, file: &'static str, line: u32, message: String) -> Self {
        Self {
            level,
            file,
            line,
            message,
            elapsed_ms: rt_util::elapsed_since_start(),
            thread_id: rt_util::thread_id(),
            thread_name: rt_util::current_name(),
            fiber_id: current_fiber_id(),
            timestamp: std::time::SystemTime::now(),
        }
    }
}

/// Fiber ids are owned by `rt-fiber`, which depends on this crate rather
/// than the other way around, so the current fiber id is obtained through a
/// thread-local hook it installs. Outside any fiber this reads 0.
pub fn current_fiber_id() -> u64 {
    CURRENT_FIBER_ID.with(|id| id.get())
}

thread_local! {
    pub(crate) static CURRENT_FIBER_ID: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
}

/// Called by `rt-fiber` on every swap-in/out to keep the log pipeline's view
/// of "current fiber id" accurate without creating a dependency cycle.
pub fn set_current_fiber_id(id: u64) {
    CURRENT_FIBER_ID.with(|cell| cell.set(id));
}
