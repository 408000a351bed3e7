// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end `Scheduler`/`IoManager` scenarios that need multiple OS
//! threads and real file descriptors, rather than a single in-process
//! check.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use rt_fiber::Fiber;
use rt_scheduler::{Event, IoManager, Scheduler, ANY_THREAD};

fn make_pipe() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: `fds` is a valid two-element buffer for `pipe` to fill.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe() failed: {}", std::io::Error::last_os_error());
    (fds[0], fds[1])
}

/// A callback re-submits itself pinned to the worker it last ran on until a
/// shared counter reaches zero, then signals completion. Every run must
/// observe the same `current_worker()`, and the scheduler must still reach
/// `stopping()` once the chain ends.
#[test]
fn callback_repins_itself_to_its_own_worker_until_done() {
    let scheduler = Scheduler::new("repin", 4, false);
    scheduler.start().unwrap();

    let remaining = Arc::new(AtomicI64::new(5));
    let seen_worker = Arc::new(AtomicUsize::new(usize::MAX));
    let mismatches = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(Barrier::new(2));

    fn step(
        scheduler: Scheduler,
        remaining: Arc<AtomicI64>,
        seen_worker: Arc<AtomicUsize>,
        mismatches: Arc<AtomicUsize>,
        done: Arc<Barrier>,
        thread_hint: i64,
    ) {
        let here = scheduler.current_worker().expect("running inside a callback");
        if thread_hint >= 0 {
            let expected = seen_worker.swap(here, Ordering::SeqCst);
            if expected != usize::MAX && expected != here {
                mismatches.fetch_add(1, Ordering::SeqCst);
            }
        } else {
            seen_worker.store(here, Ordering::SeqCst);
        }

        if remaining.fetch_sub(1, Ordering::SeqCst) > 1 {
            let next_hint = here as i64;
            let scheduler2 = scheduler.clone();
            scheduler.schedule_callback(
                move || {
                    step(
                        scheduler2,
                        remaining,
                        seen_worker,
                        mismatches,
                        done,
                        next_hint,
                    );
                },
                next_hint,
            );
        } else {
            done.wait();
        }
    }

    step(
        scheduler.clone(),
        remaining.clone(),
        seen_worker.clone(),
        mismatches.clone(),
        done.clone(),
        ANY_THREAD,
    );
    done.wait();
    scheduler.stop();

    assert_eq!(remaining.load(Ordering::SeqCst), 0);
    assert_eq!(mismatches.load(Ordering::SeqCst), 0);
}

/// Writing a single byte to a pipe registered for [`Event::Read`] resumes
/// exactly the fiber parked on it, across real worker threads, and
/// [`IoManager::stop`] still drains cleanly afterwards.
#[test]
fn pipe_readiness_resumes_the_waiting_fiber_across_threads() {
    let iom = Arc::new(IoManager::new("scenario-f", 3, false).unwrap());
    let (read_fd, write_fd) = make_pipe();
    let resumed = Arc::new(Barrier::new(2));
    let resumed2 = resumed.clone();

    let iom2 = iom.clone();
    iom.schedule_fiber(
        Fiber::new(
            move || {
                iom2.add_event(read_fd, Event::Read, None).unwrap();
                Fiber::yield_to_hold();
                let mut buf = [0u8; 8];
                // SAFETY: `read_fd` became readable; this demo owns both ends.
                let n = unsafe { libc::read(read_fd, buf.as_mut_ptr().cast(), buf.len()) };
                assert!(n > 0);
                resumed2.wait();
            },
            0,
        ),
        ANY_THREAD,
    );

    iom.schedule_callback(
        move || {
            let byte = [7u8];
            // SAFETY: `write_fd` is open and owned by this test.
            unsafe {
                libc::write(write_fd, byte.as_ptr().cast(), 1);
            }
        },
        ANY_THREAD,
    );

    resumed.wait();
    iom.stop();
}

/// Arming the same `(fd, event)` pair twice without an intervening
/// `del_event`/`cancel_event` is a programmer error, and the reactor panics
/// rather than silently dropping one registration.
#[test]
#[should_panic(expected = "already-armed")]
fn double_arming_the_same_fd_event_panics() {
    let iom = IoManager::new("scenario-f-panic", 1, false).unwrap();
    let (read_fd, _write_fd) = make_pipe();
    iom.add_event(read_fd, Event::Read, None).unwrap();
    iom.add_event(read_fd, Event::Read, None).unwrap();
}
