// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

/// The lifecycle state of a [`crate::Fiber`].
///
/// `Exec` -> `{Ready, Hold, Term, Excep}` is only ever performed by the
/// fiber itself, from inside its own stack (`yield_to_ready`,
/// `yield_to_hold`, or falling off the end of the trampoline). `Init` ->
/// `Exec` and `{Ready, Hold}` -> `Exec` are only performed by the worker
/// that resumes the fiber, via `swap_in`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    /// Created, never yet run.
    Init = 0,
    /// Suspended, waiting to be explicitly resumed (e.g. parked on I/O).
    Hold = 1,
    /// Currently executing on some worker thread.
    Exec = 2,
    /// Suspended, eligible for immediate re-scheduling.
    Ready = 3,
    /// Returned normally; terminal.
    Term = 4,
    /// The user callback unwound with a failure; terminal.
    Excep = 5,
}

impl FiberState {
    /// `Term`/`Excep` fibers are never resumed again.
    pub fn is_terminal(self) -> bool {
        matches!(self, FiberState::Term | FiberState::Excep)
    }

    /// Only these states permit [`crate::Fiber::reset`].
    pub fn resettable(self) -> bool {
        matches!(self, FiberState::Init | FiberState::Term | FiberState::Excep)
    }
}

impl From<u8> for FiberState {
    fn from(value: u8) -> Self {
        match value {
            0 => FiberState::Init,
            1 => FiberState::Hold,
            2 => FiberState::Exec,
            3 => FiberState::Ready,
            4 => FiberState::Term,
            _ => FiberState::Excep,
        }
    }
}
