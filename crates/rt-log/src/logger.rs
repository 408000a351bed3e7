// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;

use crate::appender::Appender;
use crate::event::LogEvent;
use crate::level::Level;
use crate::spinlock::CasSpinLock;

/// A named sink group with a level threshold.
///
/// `log()` falls back to the root logger when this logger has no appenders
/// of its own — named loggers created through [`crate::get_logger`] always
/// carry a reference to root for exactly this purpose.
pub struct Logger {
    name: String,
    level: std::sync::atomic::AtomicU8,
    appenders: CasSpinLock<Vec<Arc<dyn Appender>>>,
    root: Option<Arc<Logger>>,
}

impl Logger {
    pub(crate) fn new(name: impl Into<String>, root: Option<Arc<Logger>>) -> Self {
        Self {
            name: name.into(),
            level: std::sync::atomic::AtomicU8::new(Level::Debug as u8),
            appenders: CasSpinLock::new(Vec::new()),
            root,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        match self.level.load(std::sync::atomic::Ordering::Relaxed) {
            0 => Level::Debug,
            1 => Level::Info,
            2 => Level::Warn,
            3 => Level::Error,
            _ => Level::Fatal,
        }
    }

    pub fn set_level(&self, level: Level) {
        self.level
            .store(level as u8, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn add_appender(&self, appender: Arc<dyn Appender>) {
        self.appenders.lock().push(appender);
    }

    pub fn clear_appenders(&self) {
        self.appenders.lock().clear();
    }

    pub fn log(&self, event: LogEvent) {
        if event.level < self.level() {
            return;
        }
        let appenders = self.appenders.lock();
        if appenders.is_empty() {
            drop(appenders);
            if let Some(root) = &self.root {
                root.log(event);
            }
            return;
        }
        for appender in appenders.iter() {
            appender.append(&self.name, &event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appender::StdoutAppender;

    #[test]
    fn falls_back_to_root_when_no_appenders() {
        let root = Arc::new(Logger::new("root", None));
        root.add_appender(Arc::new(StdoutAppender::new()));
        let child = Logger::new("child", Some(root.clone()));
        // No panics, no appenders on child: should silently route to root.
        child.log(LogEvent::new(Level::Info, file!(), line!(), "hi".into()));
    }

    #[test]
    fn level_filters_before_dispatch() {
        let logger = Logger::new("test", None);
        logger.set_level(Level::Warn);
        assert_eq!(logger.level(), Level::Warn);
    }
}
