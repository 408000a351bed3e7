// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt::Write as _;

use crate::event::LogEvent;

const DEFAULT_PATTERN: &str = "%d{%Y-%m-%d %H:%M:%S}%T%t%T%F%T[%p]%T%c%T%f:%l%T%m%n";

enum Item {
    Literal(String),
    Message,
    Level,
    Elapsed,
    Name,
    ThreadId,
    FiberId,
    NewLine,
    Filename,
    Line,
    Tab,
    DateTime(String),
    Unknown(char),
}

/// Compiles and applies a pattern string against [`LogEvent`]s.
///
/// Grammar: `%([a-zA-Z%])(?:\{([^}]*)\})?` — a percent sign, a single letter
/// specifier, and an optional brace-delimited argument (only meaningful for
/// `%d`, the date/time specifier, where it is a `strftime`-like format).
/// Anything else is copied through literally. An unrecognized specifier
/// becomes `<<error_format %X>>` in the rendered output, rather than an
/// error at compile time, so a typo in one logger's pattern can't crash
/// the process.
pub struct Formatter {
    items: Vec<Item>,
}

impl Formatter {
    pub fn new(pattern: &str) -> Self {
        Self {
            items: compile(pattern),
        }
    }

    pub fn default_pattern() -> Self {
        Self::new(DEFAULT_PATTERN)
    }

    pub fn format(&self, logger_name: &str, event: &LogEvent) -> String {
        let mut out = String::new();
        for item in &self.items {
            match item {
                Item::Literal(s) => out.push_str(s),
                Item::Message => out.push_str(&event.message),
                Item::Level => out.push_str(event.level.as_str()),
                Item::Elapsed => {
                    let _ = write!(out, "{}", event.elapsed_ms);
                }
                Item::Name => out.push_str(logger_name),
                Item::ThreadId => {
                    let _ = write!(out, "{}", event.thread_id);
                }
                Item::FiberId => {
                    let _ = write!(out, "{}", event.fiber_id);
                }
                Item::NewLine => out.push('\n'),
                Item::Filename => out.push_str(event.file),
                Item::Line => {
                    let _ = write!(out, "{}", event.line);
                }
                Item::Tab => out.push('\t'),
                Item::DateTime(fmt) => out.push_str(&format_time(event.timestamp, fmt)),
                Item::Unknown(c) => {
                    let _ = write!(out, "<<error_format %{c}>>");
                }
            }
        }
        out
    }
}

fn compile(pattern: &str) -> Vec<Item> {
    let mut items = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            literal.push(chars[i]);
            i += 1;
            continue;
        }
        // `%` seen; need a following specifier char to form a valid item.
        if i + 1 >= chars.len() {
            literal.push('%');
            break;
        }
        let spec = chars[i + 1];
        i += 2;
        let mut arg = String::new();
        if i < chars.len() && chars[i] == '{' {
            i += 1;
            while i < chars.len() && chars[i] != '}' {
                arg.push(chars[i]);
                i += 1;
            }
            if i < chars.len() {
                i += 1; // consume '}'
            }
        }
        if !literal.is_empty() {
            items.push(Item::Literal(std::mem::take(&mut literal)));
        }
        items.push(match spec {
            '%' => Item::Literal("%".to_string()),
            'm' => Item::Message,
            'p' => Item::Level,
            'r' => Item::Elapsed,
            'c' => Item::Name,
            't' => Item::ThreadId,
            'n' => Item::NewLine,
            'd' => Item::DateTime(if arg.is_empty() {
                "%Y-%m-%d %H:%M:%S".to_string()
            } else {
                arg
            }),
            'f' => Item::Filename,
            'l' => Item::Line,
            'T' => Item::Tab,
            'F' => Item::FiberId,
            other => Item::Unknown(other),
        });
    }
    if !literal.is_empty() {
        items.push(Item::Literal(literal));
    }
    items
}

/// Minimal `strftime`-subset formatter covering the specifiers the default
/// pattern and config-declared loggers are expected to use
/// (`%Y %m %d %H %M %S`). Anything else passes through literally.
fn format_time(time: std::time::SystemTime, fmt: &str) -> String {
    let duration = time
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let days = secs / 86400;
    let time_of_day = secs % 86400;
    let (hour, minute, second) = (time_of_day / 3600, (time_of_day / 60) % 60, time_of_day % 60);
    let (year, month, day) = civil_from_days(days as i64);

    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('Y') => {
                let _ = write!(out, "{year:04}");
            }
            Some('m') => {
                let _ = write!(out, "{month:02}");
            }
            Some('d') => {
                let _ = write!(out, "{day:02}");
            }
            Some('H') => {
                let _ = write!(out, "{hour:02}");
            }
            Some('M') => {
                let _ = write!(out, "{minute:02}");
            }
            Some('S') => {
                let _ = write!(out, "{second:02}");
            }
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Howard Hinnant's days-from-civil algorithm, inverted: converts a count of
/// days since the Unix epoch into a (year, month, day) civil date.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Level;

    fn sample_event() -> LogEvent {
        LogEvent {
            level: Level::Info,
            file: "src/lib.rs",
            line: 42,
            message: "hello".to_string(),
            elapsed_ms: 7,
            thread_id: 123,
            thread_name: "main".to_string(),
            fiber_id: 0,
            timestamp: std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000),
        }
    }

    #[test]
    fn renders_known_specifiers() {
        let f = Formatter::new("%p %m%n");
        let out = f.format("test", &sample_event());
        assert_eq!(out, "INFO hello\n");
    }

    #[test]
    fn unknown_specifier_becomes_error_marker() {
        let f = Formatter::new("%Z");
        let out = f.format("test", &sample_event());
        assert_eq!(out, "<<error_format %Z>>");
    }

    #[test]
    fn literal_percent_escape() {
        let f = Formatter::new("100%%done");
        let out = f.format("test", &sample_event());
        assert_eq!(out, "100%done");
    }
}
