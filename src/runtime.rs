//! Runtime plumbing: isolate construction, script evaluation helpers, and the
//! wall-clock watchdog that terminates runaway sandboxed scripts.

use crate::dom::Document;
use crate::ops::{playground, DomHandle, SinkHandle};
use crate::result::{ConsoleSink, ErrorKind, ExecutionError, FragmentKind};
use anyhow::{anyhow, Error};
use deno_core::{JsRuntime, RuntimeOptions};
use serde::Deserialize;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one playground engine instance.
pub struct EngineConfig {
    /// Maximum V8 heap size in bytes (None = unlimited).
    pub max_heap_size: Option<usize>,
    /// Wall-clock budget for a single sandboxed run in milliseconds. `None`
    /// disables cancellation, restoring the reference behavior where an
    /// infinite loop blocks the host thread indefinitely.
    pub timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_heap_size: Some(64 * 1024 * 1024), // 64MB default
            timeout_ms: Some(5_000),
        }
    }
}

/// Create the sandbox isolate for one engine instance and install the shared
/// document/sink handles its ops resolve through.
pub(crate) fn create_runtime(
    config: &EngineConfig,
    dom: Rc<RefCell<Document>>,
    sink: Rc<RefCell<ConsoleSink>>,
) -> JsRuntime {
    let create_params = config
        .max_heap_size
        .map(|max_bytes| deno_core::v8::Isolate::create_params().heap_limits(0, max_bytes));

    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![playground::init_ops_and_esm()],
        create_params,
        ..Default::default()
    });

    if config.max_heap_size.is_some() {
        runtime.add_near_heap_limit_callback(|current, initial| {
            // Don't raise the limit - let V8 terminate gracefully instead of
            // crashing the process.
            eprintln!(
                "[playground-engine] Near heap limit: current={}MB, initial={}MB",
                current / (1024 * 1024),
                initial / (1024 * 1024)
            );
            current
        });
    }

    {
        let op_state = runtime.op_state();
        let mut state = op_state.borrow_mut();
        state.put(DomHandle(dom));
        state.put(SinkHandle(sink));
    }

    runtime
}

/// Embed arbitrary source text as a JavaScript string literal.
pub(crate) fn js_string_literal(source: &str) -> String {
    serde_json::to_string(source).unwrap_or_else(|_| String::from("\"\""))
}

/// Evaluate `code` and return its string result. The bootstrap entry points
/// all return JSON-encoded strings, so anything else is a plumbing bug.
pub(crate) fn eval_to_string(
    runtime: &mut JsRuntime,
    name: &'static str,
    code: String,
) -> Result<String, Error> {
    let global = runtime.execute_script(name, code)?;
    let scope = &mut runtime.handle_scope();
    let local = deno_core::v8::Local::new(scope, &global);
    if local.is_string() {
        Ok(local.to_rust_string_lossy(scope))
    } else {
        Err(anyhow!("sandbox entry point returned a non-string value"))
    }
}

/// Error payload produced by `describeError` in the bootstrap.
#[derive(Debug, Deserialize)]
pub(crate) struct SandboxError {
    pub syntax: bool,
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
}

impl SandboxError {
    pub(crate) fn into_execution_error(self, file: FragmentKind) -> ExecutionError {
        let kind = if self.syntax {
            ErrorKind::Syntax
        } else {
            ErrorKind::Runtime
        };
        let mut error = ExecutionError::new(kind, self.message, Some(file));
        error.stack = self.stack;
        error.line = self.line;
        error.column = self.column;
        error
    }
}

pub(crate) fn parse_sandbox_errors(json: &str) -> Result<Vec<SandboxError>, Error> {
    serde_json::from_str(json).map_err(|err| anyhow!("malformed sandbox error payload: {}", err))
}

/// Run `op` against the isolate under a wall-clock deadline.
///
/// A watchdog thread terminates execution once the budget elapses; the second
/// return value reports whether it fired. Termination is cancelled afterwards
/// so the isolate stays usable for subsequent calls.
pub(crate) fn run_with_deadline<T>(
    runtime: &mut JsRuntime,
    timeout: Option<Duration>,
    op: impl FnOnce(&mut JsRuntime) -> Result<T, Error>,
) -> (Result<T, Error>, bool) {
    let Some(timeout) = timeout else {
        return (op(runtime), false);
    };

    let isolate_handle = runtime.v8_isolate().thread_safe_handle();
    let fired = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let watchdog = {
        let fired = Arc::clone(&fired);
        let isolate_handle = isolate_handle.clone();
        std::thread::spawn(move || {
            if matches!(done_rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)) {
                fired.store(true, Ordering::SeqCst);
                isolate_handle.terminate_execution();
            }
        })
    };

    let result = op(runtime);

    let _ = done_tx.send(());
    let _ = watchdog.join();

    let timed_out = fired.load(Ordering::SeqCst);
    if timed_out {
        // Leave the isolate reusable for the next call.
        isolate_handle.cancel_terminate_execution();
    }
    (result, timed_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_literal_escapes() {
        let literal = js_string_literal("a \"quote\"\nnewline");
        assert_eq!(literal, r#""a \"quote\"\nnewline""#);
    }

    #[test]
    fn test_parse_sandbox_errors() {
        let errors =
            parse_sandbox_errors(r#"[{"syntax":true,"message":"Unexpected token","line":2}]"#)
                .unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].syntax);
        assert_eq!(errors[0].line, Some(2));
        assert_eq!(errors[0].stack, None);

        assert!(parse_sandbox_errors("not json").is_err());
        assert!(parse_sandbox_errors("[]").unwrap().is_empty());
    }

    #[test]
    fn test_sandbox_error_classification() {
        let syntax = SandboxError {
            syntax: true,
            message: "bad".into(),
            stack: None,
            line: None,
            column: None,
        };
        let error = syntax.into_execution_error(FragmentKind::Javascript);
        assert_eq!(error.kind, ErrorKind::Syntax);
        assert_eq!(error.file, Some(FragmentKind::Javascript));

        let runtime = SandboxError {
            syntax: false,
            message: "boom".into(),
            stack: Some("trace".into()),
            line: None,
            column: None,
        };
        let error = runtime.into_execution_error(FragmentKind::Javascript);
        assert_eq!(error.kind, ErrorKind::Runtime);
        assert_eq!(error.stack.as_deref(), Some("trace"));
    }
}
