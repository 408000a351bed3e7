// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A thin wrapper over the raw `epoll` syscalls; no readiness semantics
//! live here, only the syscalls themselves.

use std::io;
use std::os::fd::RawFd;

use crate::error::IoError;

pub(crate) struct Epoll {
    fd: RawFd,
}

impl Epoll {
    pub(crate) fn new() -> Result<Self, IoError> {
        // SAFETY: no preconditions; `epoll_create1` either returns a fresh
        // fd or fails.
        let fd = unsafe { libc::epoll_create1(0) };
        if fd < 0 {
            return Err(IoError::EpollCreate(io::Error::last_os_error()));
        }
        Ok(Self { fd })
    }

    pub(crate) fn ctl(&self, op: i32, fd: RawFd, events: u32) -> Result<(), IoError> {
        let mut event = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        // SAFETY: `self.fd` is a live epoll instance; `event` is a valid,
        // fully-initialized `epoll_event` the kernel only reads from for
        // `ADD`/`MOD` and ignores for `DEL`.
        let rc = unsafe { libc::epoll_ctl(self.fd, op, fd, &mut event) };
        if rc != 0 {
            return Err(IoError::EpollCtl {
                fd,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Blocks up to `timeout_ms` (or forever, if negative) for readiness,
    /// filling `events` and returning how many were written. A signal
    /// interruption is treated as "nothing ready" rather than an error.
    pub(crate) fn wait(
        &self,
        events: &mut [libc::epoll_event],
        timeout_ms: i32,
    ) -> Result<usize, IoError> {
        // SAFETY: `events` is a valid, appropriately-sized buffer for the
        // kernel to write up to `events.len()` entries into.
        let rc = unsafe {
            libc::epoll_wait(self.fd, events.as_mut_ptr(), events.len() as i32, timeout_ms)
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(IoError::EpollWait(err));
        }
        Ok(rc as usize)
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        // SAFETY: `self.fd` is owned by this `Epoll` and not otherwise used
        // after this point.
        unsafe {
            libc::close(self.fd);
        }
    }
}
