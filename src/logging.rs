//! The session's log sink: a single-writer-per-side destination for
//! textual lines with severity, fed by the local supervisor and by the
//! far side's `log_emit` reverse RPC procedure.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Severity levels, 0 (most verbose) through 10, matching the `log_level`
/// configuration field's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Severity(pub u8);

impl Severity {
    pub const TRACE: Severity = Severity(0);
    pub const DEBUG: Severity = Severity(3);
    pub const INFO: Severity = Severity(5);
    pub const WARN: Severity = Severity(7);
    pub const ERROR: Severity = Severity(9);

    fn to_log_level(self) -> log::Level {
        match self.0 {
            0..=2 => log::Level::Trace,
            3..=4 => log::Level::Debug,
            5..=6 => log::Level::Info,
            7..=8 => log::Level::Warn,
            _ => log::Level::Error,
        }
    }
}

/// A sink that accepts textual lines with a severity. Implementations must
/// serialize internally — the specification treats the sink as
/// single-writer from each side's perspective.
pub trait LogSink: Send + Sync {
    fn emit(&self, severity: Severity, line: &str);
    fn flush(&self) {}
}

/// The default sink: forwards every line to the `log` crate at the
/// severity-mapped level, tagged with the session id, and additionally
/// appends to an in-memory ring buffer when `log_write` is enabled so a
/// session can be inspected after the fact without a separate log file
/// backend.
pub struct SessionLog {
    session_id: String,
    log_write: bool,
    min_level: u8,
    history: Mutex<Vec<(Severity, String)>>,
}

const HISTORY_CAP: usize = 4096;

impl SessionLog {
    pub fn new(session_id: impl Into<String>, log_write: bool, min_level: u8) -> Self {
        Self {
            session_id: session_id.into(),
            log_write,
            min_level,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn history(&self) -> Vec<(Severity, String)> {
        self.history.lock().unwrap().clone()
    }
}

impl LogSink for SessionLog {
    fn emit(&self, severity: Severity, line: &str) {
        if severity.0 < self.min_level {
            return;
        }
        log::log!(severity.to_log_level(), "[{}] {}", self.session_id, line);
        if self.log_write {
            let mut history = self.history.lock().unwrap();
            if history.len() >= HISTORY_CAP {
                history.remove(0);
            }
            history.push((severity, line.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_is_dropped_from_history() {
        let log = SessionLog::new("test", true, Severity::INFO.0);
        log.emit(Severity::TRACE, "too quiet");
        log.emit(Severity::WARN, "loud enough");
        let history = log.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].1, "loud enough");
    }
}
