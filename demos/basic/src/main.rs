// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Exercises `rt-fiber`, `rt-scheduler`, and `rt-config` end to end: starts
//! an `IoManager`, loads a config tree, then runs a handful of fibers that
//! register config listeners and wait on pipe readiness. A demonstration
//! harness, not a library surface — nothing here is re-exported.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use clap::Parser;
use rt_scheduler::{Event, IoManager, IoManagerError};

const DEFAULT_CONFIG: &str = r#"
demo:
  greeting: "hello from the default config"
  threshold: 3
"#;

/// Unifies the failure types of the crates this demo drives, per the
/// runtime's ambient error-handling design: each crate keeps its own
/// narrow error type, and a binary that needs to report one exit failure
/// converts them all at its own boundary rather than each crate knowing
/// about the others.
#[derive(Debug, thiserror::Error)]
enum RuntimeError {
    #[error("setting up the reactor: {0}")]
    Io(#[from] IoManagerError),
    #[error("reading config file {path}: {source}")]
    ConfigRead {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Runs a small fiber/reactor/config demo.
#[derive(Parser)]
#[command(name = "basic", about = "Exercises the fiber scheduler and reactor")]
struct Args {
    /// Path to a YAML config file. Falls back to a built-in default tree.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Number of scheduler worker threads.
    #[arg(long, default_value_t = 3)]
    threads: usize,
}

fn main() -> Result<(), RuntimeError> {
    let args = Args::parse();
    load_config(args.config.as_deref())?;

    let greeting = rt_config::lookup_or_create(
        "demo.greeting",
        "hello from the default config".to_string(),
        "greeting logged at startup",
    )
    .expect("demo.greeting is a well-formed name");
    let threshold =
        rt_config::lookup_or_create("demo.threshold", 3i64, "countdown fiber start value")
            .expect("demo.threshold is a well-formed name");

    rt_log::log_info!("system", "{}", greeting.get());
    threshold.add_listener(|old, new| {
        rt_log::log_info!("config", "demo.threshold changed: {old} -> {new}");
    });

    let iom = Arc::new(IoManager::new("demo", args.threads, true)?);

    spawn_pipe_echo(&iom);
    spawn_countdown(&iom, threshold.get());

    iom.stop();
    rt_log::log_info!("system", "demo finished, {} fibers ever created", rt_fiber::Fiber::total_count());
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<(), RuntimeError> {
    let text = match path {
        Some(path) => std::fs::read_to_string(path).map_err(|source| RuntimeError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?,
        None => DEFAULT_CONFIG.to_string(),
    };
    if let Err(err) = rt_config::load_from_yaml_str(&text) {
        rt_log::log_error!("config", "failed to parse config: {err}");
    }
    Ok(())
}

/// Registers a pipe read end for readiness, then writes to it from a
/// second fiber — demonstrating `add_event`'s implicit "resume the calling
/// fiber" mode.
fn spawn_pipe_echo(iom: &Arc<IoManager>) {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: `fds` is a valid two-element buffer for `pipe2` to fill.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK) };
    assert_eq!(rc, 0, "pipe2 failed: {}", std::io::Error::last_os_error());
    let [read_fd, write_fd] = fds;

    let iom_reader = iom.clone();
    iom.schedule_fiber(
        rt_fiber::Fiber::new(
            move || {
                iom_reader
                    .add_event(read_fd, Event::Read, None)
                    .expect("read_fd not already armed");
                rt_fiber::Fiber::yield_to_hold();
                let mut buf = [0u8; 64];
                // SAFETY: `read_fd` is open and owned by this demo run.
                let n = unsafe { libc::read(read_fd, buf.as_mut_ptr().cast(), buf.len()) };
                if n > 0 {
                    let text = String::from_utf8_lossy(&buf[..n as usize]);
                    rt_log::log_info!("system", "pipe echo received: {text:?}");
                }
                // SAFETY: both ends are owned solely by this demo run.
                unsafe {
                    libc::close(read_fd);
                }
            },
            0,
        ),
        rt_scheduler::ANY_THREAD,
    );

    iom.schedule_callback(
        move || {
            let msg = b"ping";
            // SAFETY: `write_fd` is open and owned by this demo run.
            unsafe {
                libc::write(write_fd, msg.as_ptr().cast(), msg.len());
                libc::close(write_fd);
            }
        },
        rt_scheduler::ANY_THREAD,
    );
}

/// A self-rescheduling fiber that counts `start` down to zero, driving
/// `demo.threshold`'s listener once per step via `set`.
fn spawn_countdown(iom: &Arc<IoManager>, start: i64) {
    let counter = Arc::new(AtomicI64::new(start));
    let threshold = rt_config::lookup::<i64>("demo.threshold").expect("registered above");

    let fiber = rt_fiber::Fiber::new(
        move || loop {
            let remaining = counter.fetch_sub(1, Ordering::SeqCst) - 1;
            threshold.set(remaining);
            if remaining <= 0 {
                break;
            }
            rt_fiber::Fiber::yield_to_ready();
        },
        0,
    );
    iom.schedule_fiber(fiber, rt_scheduler::ANY_THREAD);
}
