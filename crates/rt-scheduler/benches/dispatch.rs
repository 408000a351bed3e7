// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use criterion::{criterion_group, criterion_main, Criterion};
use rt_scheduler::{Scheduler, ANY_THREAD};

fn callback_throughput_2_workers(c: &mut Criterion) {
    const TASKS: usize = 5_000;

    c.bench_function("callback_throughput_2_workers", |b| {
        b.iter(|| {
            let scheduler = Scheduler::new("bench", 2, false);
            scheduler.start().unwrap();
            let remaining = Arc::new(AtomicUsize::new(TASKS));
            let done = Arc::new(Barrier::new(2));
            for _ in 0..TASKS {
                let remaining = remaining.clone();
                let done = done.clone();
                scheduler.schedule_callback(
                    move || {
                        if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                            done.wait();
                        }
                    },
                    ANY_THREAD,
                );
            }
            done.wait();
            scheduler.stop();
        });
    });
}

criterion_group!(dispatch, callback_throughput_2_workers);
criterion_main!(dispatch);
