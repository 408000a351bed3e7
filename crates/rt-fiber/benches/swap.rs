// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use criterion::{criterion_group, criterion_main, Criterion};
use rt_fiber::Fiber;

fn swap_in_out_10k(c: &mut Criterion) {
    const ROUNDS: usize = 10_000;

    c.bench_function("swap_in_out_10k", |b| {
        b.iter(|| {
            let fiber = Fiber::new(
                || {
                    for _ in 0..ROUNDS {
                        Fiber::yield_to_ready();
                    }
                },
                0,
            );
            for _ in 0..=ROUNDS {
                fiber.swap_in();
            }
        });
    });
}

fn fiber_creation(c: &mut Criterion) {
    c.bench_function("fiber_creation", |b| {
        b.iter(|| {
            let fiber = Fiber::new(|| {}, 0);
            fiber.swap_in();
        });
    });
}

criterion_group!(swap, swap_in_out_10k, fiber_creation);
criterion_main!(swap);
