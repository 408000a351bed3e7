// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The raw `ucontext_t`-based context-switch primitive.
//!
//! This is a deliberate substitution for a from-scratch, architecture
//! specific assembly context-switcher: POSIX `getcontext`/`makecontext`/
//! `swapcontext` give the same one-context-per-fiber, explicit-stack
//! semantics the reference implementation uses, without committing this
//! crate to inline assembly per target.

use std::mem::MaybeUninit;

/// A saved CPU context plus the stack it runs on, wrapping `ucontext_t`.
pub(crate) struct MachineContext(libc::ucontext_t);

impl MachineContext {
    /// An empty context, to be filled in by [`MachineContext::capture`] or
    /// [`MachineContext::prepare`].
    pub(crate) fn empty() -> Self {
        // SAFETY: `ucontext_t` is a plain-old-data struct; zero-initializing
        // it is valid, and every field is overwritten before use.
        Self(unsafe { MaybeUninit::zeroed().assume_init() })
    }

    /// Prepares `self` as a fresh context that, when switched into, starts
    /// executing `entry` on `stack`, and whose `uc_link` is left null (the
    /// trampoline must never fall off the end; it always swaps out
    /// explicitly instead).
    pub(crate) fn prepare(&mut self, stack: *mut u8, stack_size: usize, entry: extern "C" fn()) {
        // SAFETY: capturing into `self.0` first so `makecontext` only has to
        // rewrite the entry point and stack fields, per `getcontext`/
        // `makecontext`'s documented usage pattern.
        let rc = unsafe { libc::getcontext(&mut self.0) };
        assert!(rc == 0, "getcontext failed");
        self.0.uc_link = std::ptr::null_mut();
        self.0.uc_stack.ss_sp = stack.cast();
        self.0.uc_stack.ss_size = stack_size;
        // SAFETY: `entry` takes no arguments and never returns to
        // `makecontext`'s caller; the stack fields were just set above to a
        // valid, appropriately-sized allocation.
        unsafe {
            libc::makecontext(&mut self.0, entry, 0);
        }
    }

    fn as_mut_ptr(&mut self) -> *mut libc::ucontext_t {
        &mut self.0
    }
}

/// Saves the caller's state into `from` and resumes `to`, matching
/// `swapcontext`. Returns once some later call swaps back into `from`.
///
/// # Safety
///
/// `from` and `to` must both be contexts previously initialized by
/// [`MachineContext::capture`] or [`MachineContext::prepare`], and must
/// remain valid (their backing stacks not freed) for as long as any
/// context chain might swap back into them.
pub(crate) unsafe fn swap(from: *mut MachineContext, to: *mut MachineContext) {
    // SAFETY: forwarded from the caller's contract.
    let rc = unsafe { libc::swapcontext((*from).as_mut_ptr(), (*to).as_mut_ptr()) };
    assert!(rc == 0, "swapcontext failed");
}
