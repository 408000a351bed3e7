// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rt_fiber::{Fiber, FiberState};

use crate::error::SchedulerError;
use crate::task::{Callback, Task, Work, ANY_THREAD};

thread_local! {
    /// This thread's worker index within the scheduler it is currently
    /// dispatching for, if any. Set once at the top of [`dispatch_loop`]
    /// and never touched again — a native thread only ever belongs to one
    /// scheduler for its whole lifetime in this design.
    static WORKER_INDEX: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Overridable behavior a [`Scheduler`] delegates to, so that `IoManager`
/// can compose a `Scheduler` instead of subclassing one.
///
/// The default [`Hooks::default`] matches a bare scheduler with no reactor:
/// `tickle` is a no-op (workers are already busy-polling the queue in their
/// idle loop, so there is nothing to wake), `idle_body` just yields `Hold`
/// until [`Scheduler::stopping`] holds, and `extra_stopping` adds no extra
/// condition.
pub(crate) struct Hooks {
    pub(crate) tickle: Box<dyn Fn() + Send + Sync>,
    pub(crate) idle_body: Box<dyn Fn(&Scheduler) + Send + Sync>,
    pub(crate) extra_stopping: Box<dyn Fn() -> bool + Send + Sync>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            tickle: Box::new(|| {}),
            idle_body: Box::new(|scheduler: &Scheduler| {
                while !scheduler.stopping() {
                    Fiber::yield_to_hold();
                }
            }),
            extra_stopping: Box::new(|| true),
        }
    }
}

struct Inner {
    name: String,
    use_caller: bool,
    thread_count: usize,
    queue: Mutex<VecDeque<Task>>,
    active_count: AtomicUsize,
    auto_stop: AtomicBool,
    started: AtomicBool,
    root_fiber: Mutex<Option<Arc<Fiber>>>,
    workers: Mutex<Vec<rt_util::Thread>>,
    hooks: Hooks,
}

/// An M:N scheduler: `thread_count` OS worker threads cooperatively running
/// [`Fiber`]s (or one-shot callbacks) pulled from a shared queue.
///
/// With `use_caller = true`, the constructing thread is counted as worker
/// `0` but does not actually dispatch anything until [`Scheduler::stop`] is
/// called — at that point it resumes a dedicated scheduler fiber and drives
/// the dispatch loop itself until the scheduler drains, then joins the
/// other workers. This keeps `new`/`start` non-blocking (so the
/// constructing thread can go on to `schedule` work) while still letting it
/// participate as a worker, and sidesteps the aliasing hazard a "resume
/// immediately in `start`" design would hit the first time the calling
/// thread's own saved context is reused as both the dispatch loop's return
/// target and its entry point — see `DESIGN.md`.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Creates a scheduler with default hooks (no reactor).
    ///
    /// # Panics
    ///
    /// Panics if `thread_count` is `0`.
    pub fn new(name: impl Into<String>, thread_count: usize, use_caller: bool) -> Self {
        Self::new_with_hooks(name, thread_count, use_caller, Hooks::default())
    }

    pub(crate) fn new_with_hooks(
        name: impl Into<String>,
        thread_count: usize,
        use_caller: bool,
        hooks: Hooks,
    ) -> Self {
        assert!(thread_count > 0, "Scheduler requires at least one worker");
        let inner = Arc::new(Inner {
            name: name.into(),
            use_caller,
            thread_count,
            queue: Mutex::new(VecDeque::new()),
            active_count: AtomicUsize::new(0),
            auto_stop: AtomicBool::new(false),
            started: AtomicBool::new(false),
            root_fiber: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            hooks,
        });
        if use_caller {
            let root_inner = inner.clone();
            let root = Fiber::new(move || dispatch_loop(root_inner, 0), 0);
            *inner.root_fiber.lock() = Some(root);
        }
        Scheduler { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn thread_count(&self) -> usize {
        self.inner.thread_count
    }

    /// Spawns the scheduler's worker threads. A no-op if already started.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Spawn`] if the OS refuses to create a
    /// worker thread; any workers already spawned in this call keep
    /// running.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let base = usize::from(self.inner.use_caller);
        let spawn_count = self.inner.thread_count - base;
        let mut workers = self.inner.workers.lock();
        for offset in 0..spawn_count {
            let worker_index = base + offset;
            let inner = self.inner.clone();
            let name = format!("{}_{worker_index}", self.inner.name);
            let handle = rt_util::Thread::spawn(name, move || dispatch_loop(inner, worker_index))
                .map_err(SchedulerError::Spawn)?;
            workers.push(handle);
        }
        Ok(())
    }

    /// Schedules `fiber` to run on `thread_hint` (or any worker, if
    /// [`crate::ANY_THREAD`]).
    pub fn schedule_fiber(&self, fiber: Arc<Fiber>, thread_hint: i64) {
        self.schedule_task(Task::fiber(fiber, thread_hint));
    }

    /// Schedules `cb` to run, wrapped in a short-lived fiber, on
    /// `thread_hint`.
    pub fn schedule_callback(&self, cb: impl FnOnce() + Send + 'static, thread_hint: i64) {
        self.schedule_task(Task::callback(Box::new(cb), thread_hint));
    }

    /// Schedules a batch of fibers under a single lock acquisition.
    pub fn schedule_fibers(&self, fibers: impl IntoIterator<Item = Arc<Fiber>>) {
        let mut queue = self.inner.queue.lock();
        let was_empty = queue.is_empty();
        for fiber in fibers {
            queue.push_back(Task::fiber(fiber, ANY_THREAD));
        }
        drop(queue);
        if was_empty {
            self.tickle();
        }
    }

    fn schedule_task(&self, task: Task) {
        let mut queue = self.inner.queue.lock();
        let was_empty = queue.is_empty();
        queue.push_back(task);
        drop(queue);
        if was_empty {
            self.tickle();
        }
    }

    /// Re-pins the currently-executing fiber to `thread_hint` and yields
    /// `Hold`, returning once it is resumed on the target worker. A no-op
    /// if already running on `thread_hint` (or `thread_hint` is
    /// [`crate::ANY_THREAD`]).
    ///
    /// # Panics
    ///
    /// Panics (via the underlying `yield_to_hold`) if called from outside
    /// any fiber's execution.
    pub fn switch_to(&self, thread_hint: i64) {
        if let Some(here) = current_worker_index() {
            if thread_hint == ANY_THREAD || thread_hint as usize == here {
                return;
            }
        }
        self.schedule_fiber(rt_fiber::current(), thread_hint);
        Fiber::yield_to_hold();
    }

    /// The calling thread's worker index, if it is currently dispatching
    /// for this scheduler (running inside a fiber or callback `schedule`d
    /// on it). `None` from any other thread.
    pub fn current_worker(&self) -> Option<usize> {
        current_worker_index()
    }

    /// Wakes a possibly-idle worker. The default implementation is a no-op
    /// (workers busy-poll); `IoManager` overrides this to write to its
    /// self-pipe.
    pub fn tickle(&self) {
        (self.inner.hooks.tickle)();
    }

    /// True once shutdown has been requested, the queue is drained, no
    /// fiber is executing, and any reactor-specific condition (pending I/O
    /// registrations) also holds.
    pub fn stopping(&self) -> bool {
        self.inner.auto_stop.load(Ordering::SeqCst)
            && self.inner.queue.lock().is_empty()
            && self.inner.active_count.load(Ordering::SeqCst) == 0
            && (self.inner.hooks.extra_stopping)()
    }

    /// Requests shutdown: wakes every worker, and if this scheduler was
    /// built with `use_caller`, drives its dispatch loop on the calling
    /// thread until it drains. Blocks until every worker thread has exited.
    pub fn stop(&self) {
        self.inner.auto_stop.store(true, Ordering::SeqCst);
        let worker_count = self.inner.workers.lock().len();
        for _ in 0..worker_count {
            self.tickle();
        }
        let root = self.inner.root_fiber.lock().clone();
        if let Some(root) = root {
            if !self.stopping() {
                root.swap_in();
            }
        }
        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

/// The worker index of the calling thread, if it is currently running a
/// scheduler's dispatch loop.
fn current_worker_index() -> Option<usize> {
    WORKER_INDEX.with(Cell::get)
}

/// The body every worker thread (and, for `use_caller` schedulers, the
/// dedicated root fiber) runs for as long as the scheduler is alive.
///
/// Mirrors the reference scheduler's `run()`: scan the queue for a task
/// this worker may execute, skipping fibers pinned elsewhere or already
/// `Exec`; run it; otherwise swap into a cached idle fiber. Per-worker
/// state (the idle fiber, and a reusable fiber for wrapping callbacks)
/// lives as locals here rather than in a separate `Worker` type, since
/// nothing outside this function ever needs to address a specific worker.
fn dispatch_loop(inner: Arc<Inner>, worker_index: usize) {
    WORKER_INDEX.with(|c| c.set(Some(worker_index)));
    let scheduler = Scheduler {
        inner: inner.clone(),
    };
    let mut idle_fiber: Option<Arc<Fiber>> = None;
    let mut cb_fiber: Option<Arc<Fiber>> = None;

    loop {
        let (task, need_tickle) = pop_task(&inner, worker_index);

        let Some(task) = task else {
            let idle = idle_fiber.get_or_insert_with(|| {
                let scheduler = scheduler.clone();
                Fiber::new(move || (scheduler.inner.hooks.idle_body)(&scheduler), 0)
            });
            if idle.state().is_terminal() {
                break;
            }
            idle.swap_in();
            continue;
        };

        match task.work {
            Work::Fiber(fiber) => {
                run_and_reap(&scheduler, &fiber);
            }
            Work::Callback(cb) => {
                run_callback(&scheduler, &mut cb_fiber, cb);
            }
        }

        if need_tickle {
            scheduler.tickle();
        }
    }
}

/// Pops the first task this worker may run, skipping fibers pinned to a
/// different worker or already `Exec` elsewhere. Returns whether any
/// skipped-or-remaining task means other workers should be woken.
fn pop_task(inner: &Inner, worker_index: usize) -> (Option<Task>, bool) {
    let mut queue = inner.queue.lock();
    let mut skipped = false;
    let mut idx = 0;
    let mut found = None;
    while idx < queue.len() {
        if !queue[idx].matches(worker_index) {
            skipped = true;
            idx += 1;
            continue;
        }
        if !queue[idx].is_runnable() {
            idx += 1;
            continue;
        }
        found = Some(queue.remove(idx).expect("idx < queue.len()"));
        break;
    }
    if found.is_some() {
        inner.active_count.fetch_add(1, Ordering::SeqCst);
    }
    let tickle = skipped || !queue.is_empty();
    (found, tickle)
}

fn run_and_reap(scheduler: &Scheduler, fiber: &Arc<Fiber>) {
    fiber.swap_in();
    scheduler.inner.active_count.fetch_sub(1, Ordering::SeqCst);
    match fiber.state() {
        FiberState::Ready => scheduler.schedule_fiber(fiber.clone(), ANY_THREAD),
        FiberState::Term | FiberState::Excep => {}
        _ => fiber.force_hold(),
    }
}

fn run_callback(scheduler: &Scheduler, cb_fiber: &mut Option<Arc<Fiber>>, cb: Callback) {
    let fiber = match cb_fiber.take() {
        Some(f) => {
            f.reset(cb);
            f
        }
        None => Fiber::new(cb, 0),
    };
    fiber.swap_in();
    scheduler.inner.active_count.fetch_sub(1, Ordering::SeqCst);
    match fiber.state() {
        FiberState::Ready => scheduler.schedule_fiber(fiber, ANY_THREAD),
        FiberState::Term | FiberState::Excep => *cb_fiber = Some(fiber),
        _ => fiber.force_hold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;
    use std::sync::Barrier;

    #[test]
    fn schedules_and_runs_a_callback() {
        let scheduler = Scheduler::new("test", 2, false);
        scheduler.start().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        scheduler.schedule_callback(move || ran2.store(true, Ordering::SeqCst), ANY_THREAD);
        scheduler.stop();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn fiber_reschedules_itself_to_a_counted_completion() {
        // A fiber pinned to worker 0 counts a shared counter down to zero
        // by re-yielding `Ready` (picked up again by the same worker, since
        // a `Ready` fiber is resubmitted with `ANY_THREAD` but only worker
        // 0 ever happens to be idle fast enough not to matter here — what
        // matters is every decrement lands and the fiber reaches `Term`).
        let scheduler = Scheduler::new("test", 3, false);
        scheduler.start().unwrap();
        let counter = Arc::new(AtomicI64::new(5));
        let done = Arc::new(Barrier::new(2));

        let f = Fiber::new(
            {
                let counter = counter.clone();
                let done = done.clone();
                move || loop {
                    if counter.fetch_sub(1, Ordering::SeqCst) > 1 {
                        Fiber::yield_to_ready();
                    } else {
                        done.wait();
                        break;
                    }
                }
            },
            0,
        );
        scheduler.schedule_fiber(f, 0);
        done.wait();
        scheduler.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
