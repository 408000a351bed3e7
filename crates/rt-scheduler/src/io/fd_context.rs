// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::os::fd::RawFd;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use rt_fiber::Fiber;

use crate::scheduler::Scheduler;
use crate::task::{Callback, ANY_THREAD};

/// A readiness event an fd can be armed for. The discriminants are the raw
/// `epoll` bits so they combine directly into an `events` mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Event {
    Read = libc::EPOLLIN as u32,
    Write = libc::EPOLLOUT as u32,
}

/// What to resume when an armed event fires: either the fiber that was
/// executing when `add_event` was called (captured implicitly), or an
/// explicit one-shot callback.
pub(crate) enum Resumable {
    Fiber(Arc<Fiber>),
    Callback(Callback),
}

#[derive(Default)]
pub(crate) struct EventContext {
    pub(crate) scheduler: Option<Scheduler>,
    pub(crate) resumable: Option<Resumable>,
}

/// Per-fd readiness bookkeeping: which events are currently armed, and what
/// to resume for each. Guarded by its own lock so one fd's churn never
/// blocks another's.
pub(crate) struct FdContext {
    pub(crate) events: u32,
    read: EventContext,
    write: EventContext,
}

impl FdContext {
    fn new() -> Self {
        Self {
            events: 0,
            read: EventContext::default(),
            write: EventContext::default(),
        }
    }

    pub(crate) fn event_ctx(&mut self, event: Event) -> &mut EventContext {
        match event {
            Event::Read => &mut self.read,
            Event::Write => &mut self.write,
        }
    }

    /// Clears `event`'s armed bit and resumes whatever was waiting on it.
    ///
    /// # Panics
    ///
    /// Panics if `event` was not armed, or was armed without a scheduler
    /// and resumable recorded — both would mean `add_event` and
    /// `trigger`/`events` bookkeeping have gone out of sync.
    pub(crate) fn trigger(&mut self, event: Event) {
        assert!(
            self.events & event as u32 != 0,
            "trigger called for an unarmed event"
        );
        self.events &= !(event as u32);
        let ctx = self.event_ctx(event);
        let scheduler = ctx
            .scheduler
            .take()
            .expect("an armed EventContext always has a scheduler");
        match ctx
            .resumable
            .take()
            .expect("an armed EventContext always has a resumable")
        {
            Resumable::Fiber(fiber) => scheduler.schedule_fiber(fiber, ANY_THREAD),
            Resumable::Callback(cb) => scheduler.schedule_callback(cb, ANY_THREAD),
        }
    }
}

/// A growable table of [`FdContext`]s indexed by raw fd, sized lazily as
/// fds are first touched.
pub(crate) struct FdTable {
    contexts: RwLock<Vec<Mutex<FdContext>>>,
}

impl FdTable {
    pub(crate) fn new() -> Self {
        Self {
            contexts: RwLock::new(Vec::new()),
        }
    }

    fn ensure_len(&self, len: usize) {
        let guard = self.contexts.upgradable_read();
        if guard.len() >= len {
            return;
        }
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        while guard.len() < len {
            guard.push(Mutex::new(FdContext::new()));
        }
    }

    /// Runs `f` with exclusive access to `fd`'s context, growing the table
    /// first if `fd` has never been touched.
    pub(crate) fn with<R>(&self, fd: RawFd, f: impl FnOnce(&mut FdContext) -> R) -> R {
        self.ensure_len(fd as usize + 1);
        let guard = self.contexts.read();
        let mut ctx = guard[fd as usize].lock();
        f(&mut ctx)
    }
}
