//! Result types shared by every executor: execution results, classified
//! errors, captured console entries, and the engine's log sink.

use serde::Serialize;
use std::time::{Instant, SystemTime};
use uuid::Uuid;

/// Error taxonomy for [`ExecutionError`].
///
/// `Network` is reserved for future fragment types (remote imports, fetch);
/// no current executor produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Syntax,
    Runtime,
    Network,
}

/// Which source fragment an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    Html,
    Css,
    Javascript,
}

/// A classified failure produced by one of the executors.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionError {
    /// Unique per instance, generated at creation time, never reused.
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FragmentKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub timestamp: SystemTime,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, file: Option<FragmentKind>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            file,
            line: None,
            column: None,
            stack: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn syntax(message: impl Into<String>, file: FragmentKind) -> Self {
        Self::new(ErrorKind::Syntax, message, Some(file))
    }

    pub fn runtime(message: impl Into<String>, file: FragmentKind) -> Self {
        Self::new(ErrorKind::Runtime, message, Some(file))
    }
}

/// Console method that produced a [`ConsoleLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    pub(crate) fn parse(level: &str) -> Self {
        match level {
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            "debug" => Self::Debug,
            _ => Self::Log,
        }
    }

    /// Tag used by the CLI when replaying captured logs to stderr.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Log => "LOG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Debug => "DEBUG",
        }
    }
}

/// One captured console invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleLog {
    pub id: Uuid,
    pub level: LogLevel,
    /// Arguments joined by a single space; non-primitive arguments are
    /// rendered structurally (pretty JSON), not via `toString`.
    pub message: String,
    /// Original argument list for consumers needing structured inspection.
    pub args: Vec<serde_json::Value>,
    pub timestamp: SystemTime,
}

/// Output of every executor call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// True iff `errors` is empty. Console output never forces failure.
    pub success: bool,
    pub errors: Vec<ExecutionError>,
    /// Logs produced during this call only, not cumulative history.
    pub console_logs: Vec<ConsoleLog>,
    /// Wall-clock milliseconds for the call.
    #[serde(rename = "executionTime")]
    pub execution_time_ms: f64,
}

impl ExecutionResult {
    pub(crate) fn from_parts(
        errors: Vec<ExecutionError>,
        console_logs: Vec<ConsoleLog>,
        started: Instant,
    ) -> Self {
        Self {
            success: errors.is_empty(),
            errors,
            console_logs,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Merge phase results in order, keeping the aggregator's own wall clock.
    pub(crate) fn merge(parts: Vec<ExecutionResult>, started: Instant) -> Self {
        let mut errors = Vec::new();
        let mut console_logs = Vec::new();
        for part in parts {
            errors.extend(part.errors);
            console_logs.extend(part.console_logs);
        }
        Self::from_parts(errors, console_logs, started)
    }
}

/// Uncapped buffer of captured console entries, owned by one engine instance.
///
/// Executors record the buffer length before a call and slice afterwards to
/// produce the per-call `consoleLogs`; entries appended later (timers, event
/// listeners) stay in the buffer and surface through the engine's
/// `console_logs()` side channel. Callers wanting bounded history apply their
/// own truncation.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    entries: Vec<ConsoleLog>,
}

impl ConsoleSink {
    pub fn push(&mut self, level: LogLevel, message: String, args: Vec<serde_json::Value>) {
        self.entries.push(ConsoleLog {
            id: Uuid::new_v4(),
            level,
            message,
            args,
            timestamp: SystemTime::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clone the entries appended since `mark`.
    pub fn slice_since(&self, mark: usize) -> Vec<ConsoleLog> {
        self.entries.get(mark..).unwrap_or_default().to_vec()
    }

    pub fn snapshot(&self) -> Vec<ConsoleLog> {
        self.entries.clone()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_mirrors_errors() {
        let ok = ExecutionResult::from_parts(vec![], vec![], Instant::now());
        assert!(ok.success);

        let failed = ExecutionResult::from_parts(
            vec![ExecutionError::runtime("boom", FragmentKind::Javascript)],
            vec![],
            Instant::now(),
        );
        assert!(!failed.success);
        assert_eq!(failed.errors.len(), 1);
    }

    #[test]
    fn test_logs_do_not_force_failure() {
        let mut sink = ConsoleSink::default();
        sink.push(LogLevel::Error, "printed error".into(), vec![]);
        let result = ExecutionResult::from_parts(vec![], sink.snapshot(), Instant::now());
        assert!(result.success);
        assert_eq!(result.console_logs.len(), 1);
    }

    #[test]
    fn test_sink_slicing() {
        let mut sink = ConsoleSink::default();
        assert!(sink.is_empty());
        sink.push(LogLevel::Log, "before".into(), vec![]);
        let mark = sink.len();
        sink.push(LogLevel::Warn, "during".into(), vec![]);
        sink.push(LogLevel::Log, "also during".into(), vec![]);

        let slice = sink.slice_since(mark);
        assert_eq!(slice.len(), 2);
        assert_eq!(slice[0].message, "during");
        assert_eq!(slice[0].level, LogLevel::Warn);
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_error_ids_are_unique() {
        let a = ExecutionError::syntax("x", FragmentKind::Css);
        let b = ExecutionError::syntax("x", FragmentKind::Css);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_merge_preserves_phase_order() {
        let started = Instant::now();
        let html = ExecutionResult::from_parts(
            vec![ExecutionError::runtime("html failed", FragmentKind::Html)],
            vec![],
            started,
        );
        let css = ExecutionResult::from_parts(
            vec![ExecutionError::syntax("css failed", FragmentKind::Css)],
            vec![],
            started,
        );
        let merged = ExecutionResult::merge(vec![html, css], started);
        assert!(!merged.success);
        assert_eq!(merged.errors[0].file, Some(FragmentKind::Html));
        assert_eq!(merged.errors[1].file, Some(FragmentKind::Css));
    }

    #[test]
    fn test_serialized_field_names_match_reference() {
        let result = ExecutionResult::from_parts(
            vec![ExecutionError::syntax("bad", FragmentKind::Javascript)],
            vec![],
            Instant::now(),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("consoleLogs").is_some());
        assert!(json.get("executionTime").is_some());
        assert_eq!(json["errors"][0]["type"], "syntax");
        assert_eq!(json["errors"][0]["file"], "javascript");
    }
}
