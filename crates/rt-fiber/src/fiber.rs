// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::{RefCell, UnsafeCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rt_log::{log_error, set_current_fiber_id};

use crate::context::{self, MachineContext};
use crate::stack::{HeapStackAllocator, Stack, StackAllocator};
use crate::state::FiberState;

type Callback = Box<dyn FnOnce() + Send>;

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);
static TOTAL_FIBERS: AtomicU64 = AtomicU64::new(0);

static DEFAULT_STACK_SIZE: Lazy<Arc<rt_config::ConfigVar<u32>>> = Lazy::new(|| {
    rt_config::lookup_or_create(
        "fiber.stack_size",
        1_048_576u32,
        "default stack size (bytes) for newly created fibers",
    )
    .expect("fiber.stack_size is a well-formed built-in config name")
});

thread_local! {
    /// The fiber currently `Exec` on this thread, if any.
    static CURRENT: RefCell<Option<Arc<Fiber>>> = const { RefCell::new(None) };
    /// This thread's bootstrap fiber: the fiber handle that represents its
    /// native OS stack. Created lazily by the first call to `Fiber::current`.
    static BOOTSTRAP: RefCell<Option<Arc<Fiber>>> = const { RefCell::new(None) };
}

/// A stackful coroutine: its own stack buffer and saved machine context,
/// cooperatively swapped in and out of an OS thread.
///
/// Fibers are reference-counted (`Arc`) because the scheduler hands fiber
/// handles across threads (a fiber runs on at most one worker at a time,
/// but which worker can change between suspensions) and because an
/// `FdContext` may park a fiber handle as a resume-token while the fiber
/// itself is not currently executing anywhere.
pub struct Fiber {
    id: u64,
    stack_size: usize,
    stack: Option<Stack>,
    ctx: UnsafeCell<MachineContext>,
    state: AtomicU8,
    callback: Mutex<Option<Callback>>,
    /// Set by `swap_in` to the fiber that resumed us; consumed by
    /// `swap_out` to know where control returns to. Transient: valid only
    /// while this fiber is `Exec`.
    caller: Mutex<Option<Arc<Fiber>>>,
}

// SAFETY: `ctx` is only ever accessed by the single thread currently
// running this fiber (or suspending/resuming it via `swap_in`/`swap_out`),
// which is exactly the scheduler's "at most one `Exec` owner" invariant.
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Fiber {
    /// Creates a new fiber in state `Init` running `cb` on its own stack.
    ///
    /// `stack_size` of `0` uses the `fiber.stack_size` config default
    /// (1 MiB unless overridden).
    pub fn new(cb: impl FnOnce() + Send + 'static, stack_size: usize) -> Arc<Self> {
        Self::new_with_allocator(cb, stack_size, Arc::new(HeapStackAllocator))
    }

    /// Like [`Fiber::new`], but with an explicit [`StackAllocator`].
    pub fn new_with_allocator(
        cb: impl FnOnce() + Send + 'static,
        stack_size: usize,
        allocator: Arc<dyn StackAllocator>,
    ) -> Arc<Self> {
        let stack_size = if stack_size == 0 {
            DEFAULT_STACK_SIZE.get() as usize
        } else {
            stack_size
        };
        let stack = Stack::new(stack_size, allocator);
        let mut ctx = MachineContext::empty();
        ctx.prepare(stack.base(), stack.size(), trampoline);

        TOTAL_FIBERS.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            id: NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed),
            stack_size,
            stack: Some(stack),
            ctx: UnsafeCell::new(ctx),
            state: AtomicU8::new(FiberState::Init as u8),
            callback: Mutex::new(Some(Box::new(cb))),
            caller: Mutex::new(None),
        })
    }

    /// Creates the bootstrap fiber representing a thread's native stack:
    /// no owned stack, immediately `Exec`.
    fn new_bootstrap() -> Arc<Self> {
        TOTAL_FIBERS.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            id: NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed),
            stack_size: 0,
            stack: None,
            ctx: UnsafeCell::new(MachineContext::empty()),
            state: AtomicU8::new(FiberState::Exec as u8),
            callback: Mutex::new(None),
            caller: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn state(&self) -> FiberState {
        FiberState::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: FiberState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Reassigns the callback and returns this fiber to `Init`, reusing its
    /// stack. Only valid in `{Init, Term, Excep}`.
    ///
    /// # Panics
    ///
    /// Panics if called on a fiber with no owned stack (the bootstrap
    /// fiber), or while the fiber is not in a resettable state.
    pub fn reset(&self, cb: impl FnOnce() + Send + 'static) {
        let Some(stack) = &self.stack else {
            panic!("Fiber::reset called on a fiber with no owned stack");
        };
        assert!(
            self.state().resettable(),
            "Fiber::reset called while in state {:?}",
            self.state()
        );
        // SAFETY: the fiber is not `Exec` (checked above) so nothing can be
        // reading `ctx` concurrently.
        let ctx = unsafe { &mut *self.ctx.get() };
        ctx.prepare(stack.base(), stack.size(), trampoline);
        *self.callback.lock() = Some(Box::new(cb));
        self.set_state(FiberState::Init);
    }

    fn ctx_ptr(&self) -> *mut MachineContext {
        self.ctx.get()
    }

    /// Resumes this fiber: saves the calling fiber's context, installs
    /// `self` as the thread's current fiber, and switches to it.
    ///
    /// # Panics
    ///
    /// Panics (via `assert!`) if `self` is already `Exec` — resuming a
    /// fiber that's running somewhere is a scheduler bug, not a recoverable
    /// condition.
    pub fn swap_in(self: &Arc<Self>) {
        assert!(
            self.state() != FiberState::Exec,
            "swap_in called on an already-Exec fiber {}",
            self.id
        );
        let prev = current();
        *self.caller.lock() = Some(prev.clone());
        CURRENT.with(|c| *c.borrow_mut() = Some(self.clone()));
        self.set_state(FiberState::Exec);
        // SAFETY: `prev`'s context is valid (either the bootstrap fiber's
        // empty-but-swapcontext-filled context, or a fiber suspended via a
        // prior `swap_out`/`swap_in`); `self`'s context was initialized by
        // `new`/`reset` and its stack is alive for as long as `self` is.
        unsafe { context::swap(prev.ctx_ptr(), self.ctx_ptr()) };
        // Control returns here once something swaps back into `prev`.
        CURRENT.with(|c| *c.borrow_mut() = Some(prev.clone()));
        set_current_fiber_id(prev.id);
    }

    /// Suspends this fiber (the caller must be the one currently `Exec`)
    /// and returns control to whoever last resumed it via `swap_in`.
    pub fn swap_out(self: &Arc<Self>) {
        let target = self
            .caller
            .lock()
            .take()
            .expect("swap_out called without a recorded caller (swap_in was never called)");
        // SAFETY: `self` is the currently-Exec context (caller's contract);
        // `target` is the fiber that resumed `self`, whose context remains
        // valid on its own stack/thread.
        unsafe { context::swap(self.ctx_ptr(), target.ctx_ptr()) };
        // Control returns here once some future `swap_in(self)` resumes us.
        CURRENT.with(|c| *c.borrow_mut() = Some(self.clone()));
        set_current_fiber_id(self.id);
    }

    /// Sets the current fiber's state to `Ready` and swaps out.
    pub fn yield_to_ready() {
        let cur = current();
        assert_eq!(cur.state(), FiberState::Exec, "yield_to_ready outside Exec");
        cur.set_state(FiberState::Ready);
        cur.swap_out();
    }

    /// Sets the current fiber's state to `Hold` and swaps out.
    pub fn yield_to_hold() {
        let cur = current();
        assert_eq!(cur.state(), FiberState::Exec, "yield_to_hold outside Exec");
        cur.set_state(FiberState::Hold);
        cur.swap_out();
    }

    /// Scheduler-side bookkeeping: after a `swap_in` returns control, forces
    /// the fiber to `Hold` unless it already reached a terminal or `Ready`
    /// state on its own. Used when a fiber parks itself on something other
    /// than the scheduler's own queue (e.g. an `IoManager` wait) without
    /// itself calling `yield_to_hold` before the scheduler regains control.
    pub fn force_hold(self: &Arc<Self>) {
        if !matches!(
            self.state(),
            FiberState::Term | FiberState::Excep | FiberState::Ready
        ) {
            self.set_state(FiberState::Hold);
        }
    }

    /// The total number of fibers ever created, process-wide.
    pub fn total_count() -> u64 {
        TOTAL_FIBERS.load(Ordering::Relaxed)
    }

    /// The current fiber's id, or `0` if this thread has never touched the
    /// fiber subsystem (no bootstrap fiber created yet).
    pub fn current_id() -> u64 {
        CURRENT.with(|c| c.borrow().as_ref().map_or(0, |f| f.id))
    }

    /// The thread's current fiber, creating its bootstrap fiber on first
    /// call on a new thread. See [`current`].
    pub fn current() -> Arc<Fiber> {
        current()
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        TOTAL_FIBERS.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Returns the thread's current fiber, creating its bootstrap fiber (and
/// installing it as both `BOOTSTRAP` and `CURRENT`) on first call.
pub fn current() -> Arc<Fiber> {
    if let Some(f) = CURRENT.with(|c| c.borrow().clone()) {
        return f;
    }
    let bootstrap = Fiber::new_bootstrap();
    BOOTSTRAP.with(|b| *b.borrow_mut() = Some(bootstrap.clone()));
    CURRENT.with(|c| *c.borrow_mut() = Some(bootstrap.clone()));
    bootstrap
}

/// Returns this thread's bootstrap fiber, creating it if needed.
pub fn bootstrap() -> Arc<Fiber> {
    if let Some(f) = BOOTSTRAP.with(|b| b.borrow().clone()) {
        return f;
    }
    current();
    BOOTSTRAP.with(|b| b.borrow().clone()).expect("current() installs BOOTSTRAP")
}

/// The `makecontext` entry point for every non-bootstrap fiber. Must never
/// return to its caller — the final `swap_out` re-enters the scheduler and
/// this function is never called again on the same stack.
extern "C" fn trampoline() {
    let fiber = CURRENT
        .with(|c| c.borrow().clone())
        .expect("trampoline entered with no current fiber installed by swap_in");
    set_current_fiber_id(fiber.id);

    let cb = fiber
        .callback
        .lock()
        .take()
        .expect("trampoline entered with no callback (fiber was already run or never reset)");

    match catch_unwind(AssertUnwindSafe(cb)) {
        Ok(()) => fiber.set_state(FiberState::Term),
        Err(payload) => {
            let message = panic_message(&payload);
            log_error!(
                "system",
                "fiber {} panicked: {message}\n{}",
                fiber.id,
                rt_util::backtrace()
            );
            fiber.set_state(FiberState::Excep);
        }
    }

    fiber.swap_out();
    unreachable!("fiber {} trampoline resumed after its final swap_out", fiber.id);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AOrdering};

    #[test]
    fn fiber_round_trips_through_yield_hold() {
        let log = Arc::new(Mutex::new(Vec::<&'static str>::new()));
        let log2 = log.clone();
        let fiber = Fiber::new(
            move || {
                Fiber::yield_to_hold();
                log2.lock().push("mid");
                Fiber::yield_to_hold();
                log2.lock().push("end");
            },
            0,
        );

        assert_eq!(fiber.state(), FiberState::Init);
        fiber.swap_in();
        assert!(log.lock().is_empty());
        assert_eq!(fiber.state(), FiberState::Hold);

        fiber.swap_in();
        assert_eq!(*log.lock(), vec!["mid"]);
        assert_eq!(fiber.state(), FiberState::Hold);

        fiber.swap_in();
        assert_eq!(*log.lock(), vec!["mid", "end"]);
        assert_eq!(fiber.state(), FiberState::Term);
    }

    #[test]
    fn panicking_fiber_reaches_excep() {
        let fiber = Fiber::new(
            || {
                panic!("boom");
            },
            0,
        );
        fiber.swap_in();
        assert_eq!(fiber.state(), FiberState::Excep);
    }

    #[test]
    fn reset_reuses_stack_and_runs_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let fiber = Fiber::new(move || {
            calls2.fetch_add(1, AOrdering::SeqCst);
        }, 0);
        fiber.swap_in();
        assert_eq!(fiber.state(), FiberState::Term);
        let calls3 = calls.clone();
        fiber.reset(move || {
            calls3.fetch_add(1, AOrdering::SeqCst);
        });
        assert_eq!(fiber.state(), FiberState::Init);
        fiber.swap_in();
        assert_eq!(fiber.state(), FiberState::Term);
        assert_eq!(calls.load(AOrdering::SeqCst), 2);
    }

    #[test]
    fn current_id_is_zero_on_fresh_thread() {
        let id = std::thread::spawn(rt_fiber_current_id_probe).join().unwrap();
        assert_eq!(id, 0);
    }

    fn rt_fiber_current_id_probe() -> u64 {
        Fiber::current_id()
    }

    #[test]
    fn total_count_increases_with_new_fibers() {
        let before = Fiber::total_count();
        let _f = Fiber::new(|| {}, 0);
        assert!(Fiber::total_count() > before);
    }

    proptest::proptest! {
        /// Invariant 2: a fiber that `yield_to_ready`s `n` times before
        /// returning normally takes exactly `n + 1` `swap_in` calls to reach
        /// `Term`, and every `swap_in` before the last one leaves it `Ready`.
        #[test]
        fn yield_count_matches_swap_in_count(n in 0u32..64) {
            let fiber = Fiber::new(
                move || {
                    for _ in 0..n {
                        Fiber::yield_to_ready();
                    }
                },
                0,
            );
            for _ in 0..n {
                fiber.swap_in();
                proptest::prop_assert_eq!(fiber.state(), FiberState::Ready);
            }
            fiber.swap_in();
            proptest::prop_assert_eq!(fiber.state(), FiberState::Term);
        }
    }
}
