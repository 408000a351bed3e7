// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::event::LogEvent;
use crate::formatter::Formatter;
use crate::level::Level;

/// A sink a [`crate::Logger`] writes formatted lines to.
pub trait Appender: Send + Sync {
    fn append(&self, logger_name: &str, event: &LogEvent);
    fn set_formatter(&self, formatter: Formatter);
    fn level(&self) -> Level;
    fn set_level(&self, level: Level);
}

/// Writes to stdout. The default appender installed on the root logger.
pub struct StdoutAppender {
    formatter: Mutex<Formatter>,
    level: Mutex<Level>,
}

impl StdoutAppender {
    pub fn new() -> Self {
        Self {
            formatter: Mutex::new(Formatter::default_pattern()),
            level: Mutex::new(Level::Debug),
        }
    }
}

impl Default for StdoutAppender {
    fn default() -> Self {
        Self::new()
    }
}

impl Appender for StdoutAppender {
    fn append(&self, logger_name: &str, event: &LogEvent) {
        if event.level < *self.level.lock().unwrap() {
            return;
        }
        let line = self.formatter.lock().unwrap().format(logger_name, event);
        print!("{line}");
        let _ = std::io::stdout().flush();
    }

    fn set_formatter(&self, formatter: Formatter) {
        *self.formatter.lock().unwrap() = formatter;
    }

    fn level(&self) -> Level {
        *self.level.lock().unwrap()
    }

    fn set_level(&self, level: Level) {
        *self.level.lock().unwrap() = level;
    }
}

/// Appends to a file, reopening it if the underlying handle goes stale.
pub struct FileAppender {
    path: PathBuf,
    file: Mutex<File>,
    formatter: Mutex<Formatter>,
    level: Mutex<Level>,
}

impl FileAppender {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            formatter: Mutex::new(Formatter::default_pattern()),
            level: Mutex::new(Level::Debug),
        })
    }

    fn open(path: &Path) -> std::io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    /// Reopens the backing file, e.g. after external log rotation.
    pub fn reopen(&self) -> std::io::Result<()> {
        let mut file = self.file.lock().unwrap();
        *file = Self::open(&self.path)?;
        Ok(())
    }
}

impl Appender for FileAppender {
    fn append(&self, logger_name: &str, event: &LogEvent) {
        if event.level < *self.level.lock().unwrap() {
            return;
        }
        let line = self.formatter.lock().unwrap().format(logger_name, event);
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
        }
    }

    fn set_formatter(&self, formatter: Formatter) {
        *self.formatter.lock().unwrap() = formatter;
    }

    fn level(&self) -> Level {
        *self.level.lock().unwrap()
    }

    fn set_level(&self, level: Level) {
        *self.level.lock().unwrap() = level;
    }
}
