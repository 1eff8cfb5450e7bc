// ABOUTME: Per-job human-readable log recorder.
// ABOUTME: Keeps "[LEVEL] message key=value" lines for post-mortem and mirrors them to tracing.

use std::fmt::{self, Write as _};

/// Severity of a job log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        })
    }
}

/// Append-only list of log lines for one job.
#[derive(Debug, Default, Clone)]
pub struct JobLog {
    lines: Vec<String>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a line. Field values are quoted with Rust debug escaping.
    pub fn record(&mut self, level: Level, message: &str, fields: &[(&str, &dyn fmt::Display)]) {
        let mut line = format!("[{}] {}", level, message);
        for (key, value) in fields {
            let _ = write!(line, " {}={:?}", key, value.to_string());
        }

        match level {
            Level::Debug => tracing::debug!(target: "digests_keep::job", "{}", line),
            Level::Info => tracing::info!(target: "digests_keep::job", "{}", line),
            Level::Warn => tracing::warn!(target: "digests_keep::job", "{}", line),
            Level::Error => tracing::error!(target: "digests_keep::job", "{}", line),
        }

        self.lines.push(line);
    }

    pub fn debug(&mut self, message: &str, fields: &[(&str, &dyn fmt::Display)]) {
        self.record(Level::Debug, message, fields);
    }

    pub fn info(&mut self, message: &str, fields: &[(&str, &dyn fmt::Display)]) {
        self.record(Level::Info, message, fields);
    }

    pub fn warn(&mut self, message: &str, fields: &[(&str, &dyn fmt::Display)]) {
        self.record(Level::Warn, message, fields);
    }

    pub fn error(&mut self, message: &str, fields: &[(&str, &dyn fmt::Display)]) {
        self.record(Level::Error, message, fields);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_level_message_and_fields() {
        let mut log = JobLog::new();
        log.info("loading", &[("url", &"http://example.net/"), ("position", &2)]);
        log.error("boom", &[]);

        assert_eq!(
            log.lines(),
            &[
                "[INFO] loading url=\"http://example.net/\" position=\"2\"".to_string(),
                "[ERROR] boom".to_string(),
            ]
        );
    }

    #[test]
    fn escapes_quotes_in_values() {
        let mut log = JobLog::new();
        log.warn("title", &[("value", &"say \"hi\"")]);
        assert_eq!(log.lines()[0], "[WARN] title value=\"say \\\"hi\\\"\"");
    }
}
