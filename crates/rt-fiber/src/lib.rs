// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Stackful coroutines (fibers) cooperatively multiplexed onto OS threads.
//!
//! A [`Fiber`] owns its stack and a saved `ucontext_t`; [`Fiber::swap_in`]
//! and [`Fiber::swap_out`] explicitly switch the calling thread between
//! fiber stacks. This crate has no notion of a scheduler or task queue —
//! that lives in `rt-scheduler`, which builds worker dispatch loops on top
//! of `swap_in`/`swap_out`/`yield_to_hold`/`yield_to_ready`.

mod context;
mod fiber;
mod state;
mod stack;

pub use fiber::{bootstrap, current, Fiber};
pub use stack::{HeapStackAllocator, StackAllocator};
pub use state::FiberState;
