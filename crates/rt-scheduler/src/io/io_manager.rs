// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;
use std::ops::Deref;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rt_fiber::Fiber;

use super::epoll::Epoll;
use super::fd_context::{Event, FdTable, Resumable};
use crate::error::{IoError, SchedulerError};
use crate::scheduler::Hooks;
use crate::task::Callback;
use crate::Scheduler;

const MAX_EVENTS: usize = 64;
const IDLE_TIMEOUT_MS: i32 = 3_000;

struct Reactor {
    epoll: Epoll,
    fds: FdTable,
    tickle_read: RawFd,
    tickle_write: RawFd,
    pending: AtomicUsize,
}

impl Drop for Reactor {
    fn drop(&mut self) {
        // SAFETY: both fds are owned by this `Reactor` and not used again.
        unsafe {
            libc::close(self.tickle_read);
            libc::close(self.tickle_write);
        }
    }
}

/// A [`Scheduler`] paired with an `epoll`-backed readiness reactor.
///
/// Rather than subclassing `Scheduler`, `IoManager` owns one and supplies
/// it with an idle-fiber body that polls `epoll` and a `tickle` override
/// that writes to a self-pipe — the composition the reference
/// implementation's inheritance-based design expresses as a base/derived
/// scheduler pair. Callers reach the `Scheduler` API (`schedule_fiber`,
/// `start`, `stop`, ...) through `Deref`.
pub struct IoManager {
    scheduler: Scheduler,
    reactor: Arc<Reactor>,
}

impl Deref for IoManager {
    type Target = Scheduler;

    fn deref(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl IoManager {
    /// # Errors
    ///
    /// Returns [`IoError`] if `epoll_create1`, the self-pipe, or the
    /// initial `epoll_ctl` registration fails; returns
    /// [`SchedulerError`] if a worker thread fails to spawn.
    pub fn new(
        name: impl Into<String>,
        thread_count: usize,
        use_caller: bool,
    ) -> Result<Self, IoManagerError> {
        let epoll = Epoll::new()?;

        // `pipe2(O_NONBLOCK)` sets the non-blocking flag atomically with
        // creation, unlike `pipe()` followed by a separate `fcntl`. A self
        // pipe is portable and enough here; an `eventfd`-based tickle would
        // save one fd and a branch in `drain_tickle_pipe` but isn't worth
        // it unless profiling says otherwise.
        let mut pipe_fds = [0 as RawFd; 2];
        // SAFETY: `pipe_fds` is a valid two-element buffer for `pipe2` to
        // fill with a read/write fd pair.
        let rc = unsafe { libc::pipe2(pipe_fds.as_mut_ptr(), libc::O_NONBLOCK) };
        if rc != 0 {
            return Err(IoManagerError::Io(IoError::Pipe(io::Error::last_os_error())));
        }
        let [tickle_read, tickle_write] = pipe_fds;
        epoll.ctl(
            libc::EPOLL_CTL_ADD,
            tickle_read,
            (libc::EPOLLIN as u32) | (libc::EPOLLET as u32),
        )?;

        let reactor = Arc::new(Reactor {
            epoll,
            fds: FdTable::new(),
            tickle_read,
            tickle_write,
            pending: AtomicUsize::new(0),
        });

        let hooks = {
            let reactor = reactor.clone();
            let tickle_reactor = reactor.clone();
            let stopping_reactor = reactor.clone();
            Hooks {
                tickle: Box::new(move || write_tickle(tickle_reactor.tickle_write)),
                idle_body: Box::new(move |scheduler: &Scheduler| idle_body(scheduler, &reactor)),
                extra_stopping: Box::new(move || {
                    stopping_reactor.pending.load(Ordering::SeqCst) == 0
                }),
            }
        };

        let scheduler = Scheduler::new_with_hooks(name, thread_count, use_caller, hooks);
        scheduler.start()?;
        Ok(Self { scheduler, reactor })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Arms `event` on `fd`, resuming `cb` (or, if `None`, the calling
    /// fiber) when it next fires.
    ///
    /// # Errors
    ///
    /// Returns an [`IoError`] if the underlying `epoll_ctl` call fails.
    ///
    /// # Panics
    ///
    /// Arming an already-armed `(fd, event)` pair is a caller bug, not a
    /// recoverable condition: this logs through the `"system"` logger and
    /// panics, rather than returning a `Result` the caller could ignore.
    /// Also panics if `cb` is `None` and this is called from outside any
    /// fiber's execution (there is nothing to capture and resume later).
    pub fn add_event(&self, fd: RawFd, event: Event, cb: Option<Callback>) -> Result<(), IoError> {
        let scheduler = self.scheduler.clone();
        self.reactor.fds.with(fd, |ctx| {
            if ctx.events & event as u32 != 0 {
                rt_log::log_error!("system", "fd {fd} already has event {event:?} armed");
                panic!("add_event called for an already-armed (fd, event) pair");
            }
            let op = if ctx.events == 0 {
                libc::EPOLL_CTL_ADD
            } else {
                libc::EPOLL_CTL_MOD
            };
            let new_events = (libc::EPOLLET as u32) | ctx.events | event as u32;
            self.reactor.epoll.ctl(op, fd, new_events)?;
            self.reactor.pending.fetch_add(1, Ordering::SeqCst);
            ctx.events |= event as u32;

            let resumable = match cb {
                Some(cb) => Resumable::Callback(cb),
                None => Resumable::Fiber(rt_fiber::current()),
            };
            let event_ctx = ctx.event_ctx(event);
            event_ctx.scheduler = Some(scheduler);
            event_ctx.resumable = Some(resumable);
            Ok(())
        })
    }

    /// Disarms `event` on `fd` without resuming whatever was waiting.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::NotArmed`] if `event` was not armed on `fd`.
    pub fn del_event(&self, fd: RawFd, event: Event) -> Result<(), IoError> {
        self.reactor.fds.with(fd, |ctx| {
            if ctx.events & event as u32 == 0 {
                return Err(IoError::NotArmed { fd, event });
            }
            let remaining = ctx.events & !(event as u32);
            let op = if remaining != 0 {
                libc::EPOLL_CTL_MOD
            } else {
                libc::EPOLL_CTL_DEL
            };
            self.reactor
                .epoll
                .ctl(op, fd, (libc::EPOLLET as u32) | remaining)?;
            ctx.events = remaining;
            *ctx.event_ctx(event) = Default::default();
            self.reactor.pending.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
    }

    /// Disarms `event` on `fd` and resumes whatever was waiting on it
    /// immediately, as if it had fired.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::NotArmed`] if `event` was not armed on `fd`.
    pub fn cancel_event(&self, fd: RawFd, event: Event) -> Result<(), IoError> {
        self.reactor.fds.with(fd, |ctx| {
            if ctx.events & event as u32 == 0 {
                return Err(IoError::NotArmed { fd, event });
            }
            let remaining = ctx.events & !(event as u32);
            let op = if remaining != 0 {
                libc::EPOLL_CTL_MOD
            } else {
                libc::EPOLL_CTL_DEL
            };
            self.reactor
                .epoll
                .ctl(op, fd, (libc::EPOLLET as u32) | remaining)?;
            self.reactor.pending.fetch_sub(1, Ordering::SeqCst);
            ctx.trigger(event);
            Ok(())
        })
    }

    /// Cancels every event currently armed on `fd`.
    pub fn cancel_all(&self, fd: RawFd) -> Result<(), IoError> {
        self.reactor.fds.with(fd, |ctx| {
            if ctx.events == 0 {
                return Ok(());
            }
            self.reactor.epoll.ctl(libc::EPOLL_CTL_DEL, fd, 0)?;
            for event in [Event::Read, Event::Write] {
                if ctx.events & event as u32 != 0 {
                    self.reactor.pending.fetch_sub(1, Ordering::SeqCst);
                    ctx.trigger(event);
                }
            }
            Ok(())
        })
    }
}

fn idle_body(scheduler: &Scheduler, reactor: &Arc<Reactor>) {
    let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];
    while !scheduler.stopping() {
        let n = match reactor.epoll.wait(&mut events, IDLE_TIMEOUT_MS) {
            Ok(n) => n,
            Err(err) => {
                rt_log::log_error!("system", "epoll_wait failed: {err}");
                0
            }
        };
        for ev in &events[..n] {
            let fd = ev.u64 as RawFd;
            if fd == reactor.tickle_read {
                drain_tickle_pipe(reactor.tickle_read);
                continue;
            }
            let ready = ev.events;
            reactor.fds.with(fd, |ctx| {
                for event in [Event::Read, Event::Write] {
                    if ready & event as u32 == 0 || ctx.events & event as u32 == 0 {
                        continue;
                    }
                    let remaining = ctx.events & !(event as u32);
                    let op = if remaining != 0 {
                        libc::EPOLL_CTL_MOD
                    } else {
                        libc::EPOLL_CTL_DEL
                    };
                    if let Err(err) = reactor.epoll.ctl(op, fd, (libc::EPOLLET as u32) | remaining)
                    {
                        rt_log::log_error!("system", "reregistering fd {fd} after readiness: {err}");
                    }
                    reactor.pending.fetch_sub(1, Ordering::SeqCst);
                    ctx.trigger(event);
                }
            });
        }
        Fiber::yield_to_hold();
    }
}

fn write_tickle(fd: RawFd) {
    let byte = [1u8];
    // SAFETY: `fd` is the write end of a pipe owned by the `Reactor` this
    // closure was built from, alive for as long as the closure is.
    let rc = unsafe { libc::write(fd, byte.as_ptr().cast(), 1) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::WouldBlock {
            rt_log::log_error!("system", "tickle write failed: {err}");
        }
    }
}

fn drain_tickle_pipe(fd: RawFd) {
    let mut buf = [0u8; 256];
    loop {
        // SAFETY: `fd` is the read end of a pipe owned by the calling
        // `Reactor`; `buf` is a valid buffer of its stated length.
        let rc = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if rc <= 0 {
            break;
        }
    }
}

/// The union of failures [`IoManager::new`] can surface: reactor setup
/// failures, or the scheduler's own worker threads failing to spawn.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IoManagerError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
