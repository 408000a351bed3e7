// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! An `epoll`-backed readiness reactor composed on top of a [`crate::Scheduler`].

mod epoll;
mod fd_context;
mod io_manager;

pub use fd_context::Event;
pub use io_manager::{IoManager, IoManagerError};
