// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cell::RefCell;
use std::io;
use std::sync::mpsc::sync_channel;
use std::thread::JoinHandle;

thread_local! {
    static CURRENT_NAME: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Returns the calling thread's OS-level id.
///
/// On Linux this is `gettid()`, distinct from the pthread handle; it is what
/// shows up in `/proc/<pid>/task` and in most profilers.
pub fn thread_id() -> u64 {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            // SAFETY: SYS_gettid takes no arguments and always succeeds.
            unsafe { libc::syscall(libc::SYS_gettid) as u64 }
        } else {
            // Fall back to a stable per-thread value derived from the std handle.
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            use std::hash::{Hash, Hasher};
            std::thread::current().id().hash(&mut hasher);
            hasher.finish()
        }
    }
}

/// Returns the calling thread's name, or `"unnamed"` if it was never set.
pub fn current_name() -> String {
    CURRENT_NAME.with(|n| {
        let n = n.borrow();
        if n.is_empty() {
            "unnamed".to_string()
        } else {
            n.clone()
        }
    })
}

/// Sets the calling thread's name, as observed by [`current_name`].
///
/// This is independent of the OS thread name; it is purely a thread-local
/// used by the log pipeline and the scheduler's worker bookkeeping.
pub fn set_current_name(name: impl Into<String>) {
    CURRENT_NAME.with(|n| *n.borrow_mut() = name.into());
}

/// An OS thread running a user closure, with a startup handshake.
///
/// The constructor does not return until the spawned thread has installed
/// its name and computed its id, so [`current_name`]/[`thread_id`] called
/// from the parent immediately after `Thread::spawn` returns observe a
/// thread that is already fully set up.
pub struct Thread {
    id: u64,
    name: String,
    join_handle: Option<JoinHandle<()>>,
}

impl Thread {
    /// Spawns `f` on a new OS thread named `name`.
    pub fn spawn(name: impl Into<String>, f: impl FnOnce() + Send + 'static) -> io::Result<Self> {
        let name = name.into();
        let (ready_tx, ready_rx) = sync_channel::<u64>(0);
        let child_name = name.clone();
        let join_handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                set_current_name(child_name);
                let id = thread_id();
                // Blocks until the parent has received the id; mirrors the
                // semaphore handshake of the reference thread wrapper.
                if ready_tx.send(id).is_err() {
                    return;
                }
                f();
            })?;
        let id = ready_rx
            .recv()
            .expect("spawned thread dropped the handshake channel before signalling readiness");
        Ok(Self {
            id,
            name,
            join_handle: Some(join_handle),
        })
    }

    /// The OS thread id, stable for the lifetime of the thread.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The name given to [`Thread::spawn`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks until the thread's closure returns.
    pub fn join(mut self) -> std::thread::Result<()> {
        self.join_handle
            .take()
            .expect("join called twice")
            .join()
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn spawn_handshake_observes_ready_state() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let t = Thread::spawn("worker_0", move || {
            assert_eq!(current_name(), "worker_0");
            ran2.store(true, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(t.name(), "worker_0");
        t.join().unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
