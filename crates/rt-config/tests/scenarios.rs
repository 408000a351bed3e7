// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Registry scenarios driven through the public crate API rather than
//! `Registry`'s own unit tests, exercising the process-wide singleton the
//! way a real caller would. Each test uses its own name prefix since the
//! registry is shared across the whole test binary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Registering a name as one type, then asking for it back as a different
/// type, is a type collision: the second handle is `None`, logged, and the
/// original handle is unaffected.
#[test]
fn type_collision_on_an_existing_name_yields_none() {
    let port = rt_config::lookup_or_create("scenario_b.port", 8080i64, "listen port").unwrap();
    assert_eq!(port.get(), 8080);

    let as_float = rt_config::lookup::<f64>("scenario_b.port");
    assert!(as_float.is_none());

    let as_string = rt_config::lookup_or_create(
        "scenario_b.port",
        "8080".to_string(),
        "listen port, but wrong type",
    );
    assert!(as_string.is_none());

    assert_eq!(port.get(), 8080);
}

/// Loading a YAML tree sets every leaf it names, creates the path if the
/// name didn't exist, and leaves unrelated names untouched.
#[test]
fn loading_a_yaml_tree_sets_nested_leaves() {
    let unrelated =
        rt_config::lookup_or_create("scenario_c.untouched", 1i64, "not in the tree below").unwrap();

    let yaml = r#"
scenario_c:
  greeting: "hi"
  limits:
    retries: 3
    backoff_ms: 250
"#;
    rt_config::load_from_yaml_str(yaml).unwrap();

    let greeting =
        rt_config::lookup_or_create("scenario_c.greeting", String::new(), "").unwrap();
    let retries = rt_config::lookup_or_create("scenario_c.limits.retries", 0i64, "").unwrap();
    let backoff = rt_config::lookup_or_create("scenario_c.limits.backoff_ms", 0i64, "").unwrap();

    assert_eq!(greeting.get(), "hi");
    assert_eq!(retries.get(), 3);
    assert_eq!(backoff.get(), 250);
    assert_eq!(unrelated.get(), 1);
}

/// A listener registered on a variable fires exactly once per `set` that
/// actually changes the value, observing the old and new value in order,
/// across a burst of updates from a different thread.
#[test]
fn listener_observes_every_distinct_update_from_another_thread() {
    let counter =
        rt_config::lookup_or_create("scenario_c.counter", 0i64, "counts up from a worker thread")
            .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    let last_seen = Arc::new(std::sync::Mutex::new(0i64));
    let last_seen2 = last_seen.clone();
    counter.add_listener(move |_old, new| {
        calls2.fetch_add(1, Ordering::SeqCst);
        *last_seen2.lock().unwrap() = *new;
    });

    let handle = counter.clone();
    std::thread::spawn(move || {
        for v in 1..=10 {
            handle.set(v);
        }
    })
    .join()
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 10);
    assert_eq!(*last_seen.lock().unwrap(), 10);
    assert_eq!(counter.get(), 10);
}
