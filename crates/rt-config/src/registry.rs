// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The process-wide dotted-name-to-[`ConfigVarBase`] registry.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use rt_log::log_error;

use crate::codec::TextCodec;
use crate::error::ConfigError;
use crate::var::{ConfigVar, ConfigVarBase};

/// Process-wide registry, created on first use and never torn down.
pub struct Registry {
    vars: RwLock<HashMap<String, Arc<dyn ConfigVarBase>>>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

impl Registry {
    fn new() -> Self {
        Self {
            vars: RwLock::new(HashMap::new()),
        }
    }

    /// Looks up an existing variable whose stored type matches `T`.
    ///
    /// Returns `None` if the name is absent, or if it exists with a
    /// different type (logging the mismatch first).
    pub fn lookup<T>(&self, name: &str) -> Option<Arc<ConfigVar<T>>>
    where
        T: TextCodec + Clone + PartialEq + Send + Sync + 'static,
    {
        let name = canonicalize(name);
        let base = self.vars.read().get(&name)?.clone();
        downcast(&name, base)
    }

    /// Get-or-create: returns the existing handle if present with a matching
    /// type, creates and installs a new one initialized to `default` if
    /// absent, or logs and returns `None` on a type mismatch or invalid name.
    pub fn lookup_or_create<T>(
        &self,
        name: &str,
        default: T,
        description: &str,
    ) -> Option<Arc<ConfigVar<T>>>
    where
        T: TextCodec + Clone + PartialEq + Send + Sync + 'static,
    {
        let name = canonicalize(name);
        let guard = self.vars.upgradable_read();
        if let Some(base) = guard.get(&name) {
            return downcast(&name, base.clone());
        }
        if !is_valid_name(&name) {
            log_error!("config", "invalid config name {name:?}: must match [a-z0-9._]+");
            return None;
        }
        let var = Arc::new(ConfigVar::new(name.clone(), description, default));
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        guard.insert(name, var.clone() as Arc<dyn ConfigVarBase>);
        Some(var)
    }

    /// Registers a brand-new variable, failing if the name is already taken
    /// (regardless of type) or invalid.
    pub fn register<T>(
        &self,
        name: &str,
        description: &str,
        default: T,
    ) -> Result<Arc<ConfigVar<T>>, ConfigError>
    where
        T: TextCodec + Clone + PartialEq + Send + Sync + 'static,
    {
        let name = canonicalize(name);
        if !is_valid_name(&name) {
            return Err(ConfigError::InvalidName(name));
        }
        let guard = self.vars.upgradable_read();
        if guard.contains_key(&name) {
            return Err(ConfigError::TypeMismatch(name));
        }
        let var = Arc::new(ConfigVar::new(name.clone(), description, default));
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        guard.insert(name, var.clone() as Arc<dyn ConfigVarBase>);
        Ok(var)
    }

    /// Type-erased lookup, regardless of the stored value type.
    pub fn lookup_base(&self, name: &str) -> Option<Arc<dyn ConfigVarBase>> {
        let name = canonicalize(name);
        self.vars.read().get(&name).cloned()
    }

    /// Invokes `cb` once per registered variable, under a shared lock.
    pub fn visit(&self, mut cb: impl FnMut(&Arc<dyn ConfigVarBase>)) {
        for var in self.vars.read().values() {
            cb(var);
        }
    }

    /// Walks a structured tree, feeding each leaf's serialized text to the
    /// registered variable at the matching dotted path. Unknown paths are
    /// silently ignored (forward compatibility); paths that don't
    /// canonicalize to a valid name are skipped with a logged error.
    pub fn load_from_tree(&self, root: &serde_yaml::Value) {
        for (path, node) in flatten(root) {
            let name = canonicalize(&path);
            if !is_valid_name(&name) {
                log_error!("config", "skipping config path {path:?}: invalid name");
                continue;
            }
            let Some(var) = self.vars.read().get(&name).cloned() else {
                continue;
            };
            let text = match serde_yaml::to_string(&node) {
                Ok(t) => t.trim_end().to_string(),
                Err(e) => {
                    log_error!("config", "could not serialize {path:?}: {e}");
                    continue;
                }
            };
            if let Err(e) = var.from_text(&text) {
                log_error!("config", "loading {path:?}: {e}");
            }
        }
    }

    /// Parses `text` as YAML and loads it via [`Registry::load_from_tree`].
    pub fn load_from_yaml_str(&self, text: &str) -> Result<(), serde_yaml::Error> {
        let root: serde_yaml::Value = serde_yaml::from_str(text)?;
        self.load_from_tree(&root);
        Ok(())
    }
}

fn downcast<T>(name: &str, base: Arc<dyn ConfigVarBase>) -> Option<Arc<ConfigVar<T>>>
where
    T: TextCodec + Clone + PartialEq + Send + Sync + 'static,
{
    match base.as_any_arc().downcast::<ConfigVar<T>>() {
        Ok(var) => Some(var),
        Err(_) => {
            log_error!(
                "config",
                "config variable {name:?} exists with a different type (wanted {})",
                T::type_name()
            );
            None
        }
    }
}

/// Lowercases a dotted config name for lookup/registration.
pub(crate) fn canonicalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'_')
}

/// Flattens a `serde_yaml::Value` tree into `(dotted.path, leaf_value)`
/// pairs. Sequences are treated as leaves (their element coercion happens
/// inside `TextCodec`, not at the tree-walk level) so `a.b: [1, 2, 3]`
/// produces a single pair, not one per element.
fn flatten(root: &serde_yaml::Value) -> Vec<(String, serde_yaml::Value)> {
    let mut out = Vec::new();
    flatten_into("", root, &mut out);
    out
}

fn flatten_into(prefix: &str, node: &serde_yaml::Value, out: &mut Vec<(String, serde_yaml::Value)>) {
    match node {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map {
                let Some(key) = key.as_str() else { continue };
                let path = if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}.{key}")
                };
                if matches!(value, serde_yaml::Value::Mapping(_)) {
                    flatten_into(&path, value, out);
                } else {
                    out.push((path, value.clone()));
                }
            }
        }
        other => {
            if !prefix.is_empty() {
                out.push((prefix.to_string(), other.clone()));
            }
        }
    }
}

/// Looks up a variable by name with matching type `T`. See
/// [`Registry::lookup`].
pub fn lookup<T>(name: &str) -> Option<Arc<ConfigVar<T>>>
where
    T: TextCodec + Clone + PartialEq + Send + Sync + 'static,
{
    REGISTRY.lookup(name)
}

/// Get-or-create a variable by name. See [`Registry::lookup_or_create`].
pub fn lookup_or_create<T>(name: &str, default: T, description: &str) -> Option<Arc<ConfigVar<T>>>
where
    T: TextCodec + Clone + PartialEq + Send + Sync + 'static,
{
    REGISTRY.lookup_or_create(name, default, description)
}

/// Registers a brand-new variable. See [`Registry::register`].
pub fn register<T>(
    name: &str,
    description: &str,
    default: T,
) -> Result<Arc<ConfigVar<T>>, ConfigError>
where
    T: TextCodec + Clone + PartialEq + Send + Sync + 'static,
{
    REGISTRY.register(name, description, default)
}

/// Type-erased lookup. See [`Registry::lookup_base`].
pub fn lookup_base(name: &str) -> Option<Arc<dyn ConfigVarBase>> {
    REGISTRY.lookup_base(name)
}

/// Visits every registered variable. See [`Registry::visit`].
pub fn visit(cb: impl FnMut(&Arc<dyn ConfigVarBase>)) {
    REGISTRY.visit(cb)
}

/// Loads a structured tree into the global registry. See
/// [`Registry::load_from_tree`].
pub fn load_from_tree(root: &serde_yaml::Value) {
    REGISTRY.load_from_tree(root)
}

/// Parses and loads a YAML document into the global registry. See
/// [`Registry::load_from_yaml_str`].
pub fn load_from_yaml_str(text: &str) -> Result<(), serde_yaml::Error> {
    REGISTRY.load_from_yaml_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_round_trips() {
        let reg = Registry::new();
        reg.register("test.registry.port", "a port", 8080i64).unwrap();
        let v = reg.lookup::<i64>("test.registry.port").unwrap();
        assert_eq!(v.get(), 8080);
    }

    #[test]
    fn lookup_with_wrong_type_is_none() {
        let reg = Registry::new();
        reg.register("test.registry.port2", "a port", 8080i64).unwrap();
        assert!(reg.lookup::<f64>("test.registry.port2").is_none());
        // original handle is unaffected
        assert_eq!(reg.lookup::<i64>("test.registry.port2").unwrap().get(), 8080);
    }

    #[test]
    fn lookup_or_create_creates_on_first_call() {
        let reg = Registry::new();
        let v = reg
            .lookup_or_create("fiber.stack_size", 1_048_576u32, "default fiber stack size")
            .unwrap();
        assert_eq!(v.get(), 1_048_576);
        let v2 = reg
            .lookup_or_create("fiber.stack_size", 0u32, "default fiber stack size")
            .unwrap();
        assert_eq!(v2.get(), 1_048_576);
    }

    #[test]
    fn invalid_name_is_rejected() {
        let reg = Registry::new();
        assert!(matches!(
            reg.register("Bad Name!", "", 1u32),
            Err(ConfigError::InvalidName(_))
        ));
    }

    #[test]
    fn load_from_tree_sets_nested_scalars_and_sequences() {
        let reg = Registry::new();
        reg.register("system.port", "", 8080i64).unwrap();
        reg.register("system.int_vec", "", Vec::<i64>::new()).unwrap();
        let root: serde_yaml::Value = serde_yaml::from_str(
            "system:\n  port: 9090\n  int_vec: [3, 4, 5]\n",
        )
        .unwrap();
        reg.load_from_tree(&root);
        assert_eq!(reg.lookup::<i64>("system.port").unwrap().get(), 9090);
        assert_eq!(
            reg.lookup::<Vec<i64>>("system.int_vec").unwrap().get(),
            vec![3, 4, 5]
        );
    }

    #[test]
    fn load_from_tree_is_idempotent() {
        let reg = Registry::new();
        let v = reg.register("system.name", "", String::new()).unwrap();
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        v.add_listener(move |_, _| {
            calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        let root: serde_yaml::Value = serde_yaml::from_str("system:\n  name: sylar\n").unwrap();
        reg.load_from_tree(&root);
        reg.load_from_tree(&root);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_path_is_ignored() {
        let reg = Registry::new();
        let root: serde_yaml::Value =
            serde_yaml::from_str("nobody:\n  registers:\n    this: 1\n").unwrap();
        reg.load_from_tree(&root); // must not panic
    }
}
