// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};

use crate::codec::TextCodec;
use crate::error::ConfigError;

/// Handle returned by [`ConfigVar::add_listener`]; pass back to
/// [`ConfigVar::del_listener`] to remove it.
pub type ListenerId = u64;

/// Type-erased capability set every registered variable exposes to the
/// registry, regardless of its value type.
pub trait ConfigVarBase: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn type_name(&self) -> &'static str;
    fn to_text(&self) -> String;
    fn from_text(&self, text: &str) -> Result<(), ConfigError>;
    fn as_any(&self) -> &dyn Any;

    /// Recovers the original `Arc<ConfigVar<T>>` behind this type-erased
    /// handle, for typed lookups that need to hand callers an owned handle
    /// rather than a borrow scoped to the registry lock.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A single typed configuration value plus its change listeners.
pub struct ConfigVar<T> {
    name: String,
    description: String,
    value: RwLock<T>,
    listeners: RwLock<HashMap<ListenerId, Box<dyn Fn(&T, &T) + Send + Sync>>>,
    next_listener_id: AtomicU64,
}

impl<T> ConfigVar<T>
where
    T: TextCodec + Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(name: impl Into<String>, description: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            value: RwLock::new(value),
            listeners: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Sets the value, invoking every listener exactly once if (and only
    /// if) the new value differs from the current one.
    ///
    /// Listeners run while an upgradable read guard on the value is held.
    /// A listener that calls `set_value`/`get` on the *same* variable will
    /// deadlock — this mirrors the reference implementation's own
    /// lock-while-notifying contract rather than papering over it with a
    /// snapshot-then-release scheme.
    pub fn set(&self, new: T) {
        let guard = self.value.upgradable_read();
        if *guard == new {
            return;
        }
        for listener in self.listeners.read().values() {
            listener(&guard, &new);
        }
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        *guard = new;
    }

    pub fn add_listener(&self, cb: impl Fn(&T, &T) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().insert(id, Box::new(cb));
        id
    }

    pub fn del_listener(&self, id: ListenerId) {
        self.listeners.write().remove(&id);
    }

    pub fn has_listener(&self, id: ListenerId) -> bool {
        self.listeners.read().contains_key(&id)
    }

    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
    }
}

impl<T> ConfigVarBase for ConfigVar<T>
where
    T: TextCodec + Clone + PartialEq + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn type_name(&self) -> &'static str {
        T::type_name()
    }

    fn to_text(&self) -> String {
        self.get().to_text()
    }

    fn from_text(&self, text: &str) -> Result<(), ConfigError> {
        let parsed = T::from_text(text).map_err(|_| ConfigError::ParseFailure {
            name: self.name.clone(),
            text: text.to_string(),
        })?;
        self.set(parsed);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn set_is_noop_when_value_unchanged() {
        let var = ConfigVar::new("x", "", 5u32);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        var.add_listener(move |_, _| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        var.set(5);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        var.set(6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn from_text_round_trips_through_to_text() {
        let var = ConfigVar::new("x", "", 1048576u32);
        let text = ConfigVarBase::to_text(&var);
        assert_eq!(text, "1048576");
        ConfigVarBase::from_text(&var, &text).unwrap();
        assert_eq!(var.get(), 1048576);
    }

    proptest::proptest! {
        /// Invariant 5: `from_text(v, to_text(v))` is a no-op for any value
        /// the type can hold — the value is unchanged and no listener fires.
        #[test]
        fn round_trip_is_a_noop(value: i64) {
            let var = ConfigVar::new("x", "", value);
            let calls = Arc::new(AtomicUsize::new(0));
            let calls2 = calls.clone();
            var.add_listener(move |_, _| {
                calls2.fetch_add(1, Ordering::SeqCst);
            });

            let text = ConfigVarBase::to_text(&var);
            ConfigVarBase::from_text(&var, &text).unwrap();

            proptest::prop_assert_eq!(var.get(), value);
            proptest::prop_assert_eq!(calls.load(Ordering::SeqCst), 0);
        }

        /// Listeners only ever observe the subsequence of distinct adjacent
        /// values in a `set` sequence (invariant 4), never a value equal to
        /// the one immediately preceding it.
        #[test]
        fn listeners_never_see_a_repeated_adjacent_value(values: Vec<i64>) {
            let var = ConfigVar::new("x", "", 0i64);
            let seen = Arc::new(Mutex::new(Vec::new()));
            let seen2 = seen.clone();
            var.add_listener(move |old, new| seen2.lock().unwrap().push((*old, *new)));

            for v in values {
                var.set(v);
            }

            let seen = seen.lock().unwrap();
            for (old, new) in seen.iter() {
                proptest::prop_assert_ne!(old, new);
            }
        }
    }
}
