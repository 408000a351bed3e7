// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The process-wide name-to-[`Logger`] registry.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::appender::StdoutAppender;
use crate::logger::Logger;

struct Manager {
    root: Arc<Logger>,
    loggers: RwLock<HashMap<String, Arc<Logger>>>,
}

static MANAGER: Lazy<Manager> = Lazy::new(|| {
    let root = Arc::new(Logger::new("root", None));
    root.add_appender(Arc::new(StdoutAppender::new()));
    Manager {
        root,
        loggers: RwLock::new(HashMap::new()),
    }
});

/// The root logger, always present, always has at least a stdout appender
/// unless the caller explicitly clears it.
pub fn root() -> Arc<Logger> {
    MANAGER.root.clone()
}

/// Gets or creates the logger named `name`. New loggers are created with no
/// appenders of their own and a reference to [`root`] for fallback, exactly
/// matching the reference manager's get-or-create contract.
pub fn get_logger(name: &str) -> Arc<Logger> {
    if name == "root" {
        return root();
    }
    if let Some(existing) = MANAGER.loggers.read().get(name) {
        return existing.clone();
    }
    let mut loggers = MANAGER.loggers.write();
    loggers
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(Logger::new(name, Some(MANAGER.root.clone()))))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_logger_is_idempotent() {
        let a = get_logger("subsystem.test_manager");
        let b = get_logger("subsystem.test_manager");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn root_is_singleton() {
        assert!(Arc::ptr_eq(&root(), &root()));
    }
}
