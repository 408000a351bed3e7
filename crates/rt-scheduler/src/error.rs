// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use thiserror::Error;

/// Failures starting or running a [`crate::Scheduler`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Failures from the `epoll`-backed reactor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IoError {
    #[error("epoll_create1 failed: {0}")]
    EpollCreate(#[source] std::io::Error),

    #[error("failed to create the tickle pipe: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("epoll_ctl failed for fd {fd}: {source}")]
    EpollCtl { fd: i32, source: std::io::Error },

    #[error("epoll_wait failed: {0}")]
    EpollWait(#[source] std::io::Error),

    #[error("fd {fd} has no event {event:?} armed")]
    NotArmed { fd: i32, event: crate::io::Event },
}
