//! The playground execution engine: takes untrusted HTML/CSS/JavaScript text,
//! executes it against a headless mount subtree, captures console output, and
//! classifies failures - without ever returning `Err` or panicking across its
//! public surface.

use crate::dom::{Document, NodeId};
use crate::html;
use crate::result::{
    ConsoleLog, ConsoleSink, ErrorKind, ExecutionError, ExecutionResult, FragmentKind,
};
use crate::runtime::{
    self, create_runtime, eval_to_string, js_string_literal, parse_sandbox_errors, EngineConfig,
};
use crate::validate::validate_css;
use deno_core::JsRuntime;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// One engine instance owns one isolate, one headless document (whose
/// container element is the mount subtree), one managed `<style>` node, and
/// one console buffer.
///
/// Calls must be serialized by the caller; there is no internal locking, and
/// overlapping executions would contend for the mount subtree and the managed
/// style node.
pub struct PlaygroundEngine {
    js: JsRuntime,
    dom: Rc<RefCell<Document>>,
    sink: Rc<RefCell<ConsoleSink>>,
    managed_style: Option<NodeId>,
    timeout: Option<Duration>,
}

impl PlaygroundEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let dom = Rc::new(RefCell::new(Document::new()));
        let sink = Rc::new(RefCell::new(ConsoleSink::default()));
        let js = create_runtime(config, Rc::clone(&dom), Rc::clone(&sink));
        Self {
            js,
            dom,
            sink,
            managed_style: None,
            timeout: config.timeout_ms.map(Duration::from_millis),
        }
    }

    /// Strip script elements and inject the remaining markup into the mount
    /// subtree. The parser auto-corrects malformed markup; the call only
    /// fails if the injection itself does.
    pub fn execute_html(&mut self, html: &str) -> ExecutionResult {
        let started = Instant::now();
        let mark = self.sink.borrow().len();
        let mut errors = Vec::new();

        let stripped = html::strip_script_elements(html);
        let container = self.dom.borrow().container();
        if let Err(err) = self.dom.borrow_mut().set_inner_html(container, &stripped) {
            errors.push(ExecutionError::runtime(err.to_string(), FragmentKind::Html));
        }

        self.finish(errors, mark, started)
    }

    /// Validate the CSS fragment, then replace the managed style node with
    /// its content. Invalid CSS never touches the DOM.
    pub fn execute_css(&mut self, css: &str) -> ExecutionResult {
        let started = Instant::now();
        let mark = self.sink.borrow().len();

        let report = validate_css(css);
        if !report.is_valid {
            let errors = report
                .errors
                .into_iter()
                .map(|message| ExecutionError::syntax(message, FragmentKind::Css))
                .collect();
            return self.finish(errors, mark, started);
        }

        let mut errors = Vec::new();
        if let Err(err) = self.replace_managed_style(css) {
            errors.push(ExecutionError::runtime(err.to_string(), FragmentKind::Css));
        }
        self.finish(errors, mark, started)
    }

    fn replace_managed_style(&mut self, css: &str) -> anyhow::Result<()> {
        let mut dom = self.dom.borrow_mut();
        let head = dom.head();
        if let Some(previous) = self.managed_style.take() {
            dom.remove_child(head, previous)?;
        }
        let style = dom.create_element("style");
        dom.set_text_content(style, css)?;
        dom.append_child(head, style)?;
        self.managed_style = Some(style);
        Ok(())
    }

    /// Two-phase JavaScript execution: a compile-only syntax pre-check, then
    /// a sandboxed run against the document/window/console shims. A syntax
    /// failure guarantees the body never ran.
    pub fn execute_javascript(&mut self, js: &str) -> ExecutionResult {
        let started = Instant::now();
        let mark = self.sink.borrow().len();
        let literal = js_string_literal(js);

        // Phase 1: construct a callable without invoking it.
        let check = format!("globalThis.__playground.checkSyntax({literal})");
        match self.sandbox_call("<syntax-check>", check) {
            Ok(errors) if errors.is_empty() => {}
            Ok(errors) => return self.finish(errors, mark, started),
            Err(error) => return self.finish(vec![error], mark, started),
        }

        // Phase 2: sandboxed run under the wall-clock budget.
        let run = format!("globalThis.__playground.run({literal})");
        let errors = self.sandbox_call_with_deadline("<playground>", run);
        self.finish(errors, mark, started)
    }

    /// Sequence HTML, then CSS, then JavaScript, unconditionally: an earlier
    /// phase failing never blocks a later phase. Errors and logs are merged
    /// in phase order.
    pub fn execute_all(&mut self, html: &str, css: &str, js: &str) -> ExecutionResult {
        let started = Instant::now();
        let parts = vec![
            self.execute_html(html),
            self.execute_css(css),
            self.execute_javascript(js),
        ];
        ExecutionResult::merge(parts, started)
    }

    /// Simulate an event on the first element matching `selector`, invoking
    /// the sandbox-registered listeners for it. Substitute for real DOM
    /// interaction in a headless environment.
    pub fn dispatch_event(&mut self, selector: &str, event: &str) -> ExecutionResult {
        let started = Instant::now();
        let mark = self.sink.borrow().len();

        let target = {
            let dom = self.dom.borrow();
            let container = dom.container();
            dom.query_selector(container, selector)
        };
        let target = match target {
            Ok(Some(node)) => node,
            Ok(None) => {
                let error = ExecutionError::new(
                    ErrorKind::Runtime,
                    format!("no element matches selector {:?}", selector),
                    None,
                );
                return self.finish(vec![error], mark, started);
            }
            Err(err) => {
                let error = ExecutionError::new(ErrorKind::Runtime, err.to_string(), None);
                return self.finish(vec![error], mark, started);
            }
        };

        let listener_ids = self
            .dom
            .borrow()
            .listeners_for(target, event)
            .unwrap_or_default();
        if listener_ids.is_empty() {
            return self.finish(Vec::new(), mark, started);
        }

        let ids_json = serde_json::to_string(&listener_ids).unwrap_or_else(|_| "[]".into());
        let code = format!(
            "globalThis.__playground.dispatch({ids_json}, {event}, {target})",
            event = js_string_literal(event),
        );
        let errors = self.sandbox_call_with_deadline("<dispatch>", code);
        self.finish(errors, mark, started)
    }

    /// Advance the sandbox's virtual clock by `ms`, running every timer that
    /// comes due (including zero-delay `DOMContentLoaded` deliveries).
    /// Substitute for the browser event loop in a headless environment.
    pub fn advance_time(&mut self, ms: u64) -> ExecutionResult {
        let started = Instant::now();
        let mark = self.sink.borrow().len();
        let code = format!("globalThis.__playground.tick({ms})");
        let errors = self.sandbox_call_with_deadline("<tick>", code);
        self.finish(errors, mark, started)
    }

    /// Empty the mount subtree and remove the managed style node. The log
    /// buffer is left untouched; use [`Self::clear_logs`] for that.
    pub fn clear(&mut self) {
        let mut dom = self.dom.borrow_mut();
        let container = dom.container();
        let _ = dom.clear_children(container);
        if let Some(style) = self.managed_style.take() {
            let head = dom.head();
            let _ = dom.remove_child(head, style);
        }
    }

    /// Empty the internal log buffer used for per-call slicing.
    pub fn clear_logs(&mut self) {
        self.sink.borrow_mut().clear();
    }

    /// Every log captured over the life of this instance, including entries
    /// produced after their originating call returned (timers, listeners).
    pub fn console_logs(&self) -> Vec<ConsoleLog> {
        self.sink.borrow().snapshot()
    }

    /// Serialized markup of the mount subtree.
    pub fn container_html(&self) -> String {
        let dom = self.dom.borrow();
        let container = dom.container();
        dom.inner_html(container).unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn finish(
        &self,
        errors: Vec<ExecutionError>,
        mark: usize,
        started: Instant,
    ) -> ExecutionResult {
        let logs = self.sink.borrow().slice_since(mark);
        ExecutionResult::from_parts(errors, logs, started)
    }

    /// Call a bootstrap entry point that returns a JSON error array.
    fn sandbox_call(
        &mut self,
        name: &'static str,
        code: String,
    ) -> Result<Vec<ExecutionError>, ExecutionError> {
        let payload = eval_to_string(&mut self.js, name, code)
            .and_then(|json| parse_sandbox_errors(&json))
            .map_err(|err| {
                ExecutionError::runtime(err.to_string(), FragmentKind::Javascript)
            })?;
        Ok(payload
            .into_iter()
            .map(|error| error.into_execution_error(FragmentKind::Javascript))
            .collect())
    }

    /// Like [`Self::sandbox_call`] but under the wall-clock watchdog; a fired
    /// deadline is reported as a runtime timeout error.
    fn sandbox_call_with_deadline(&mut self, name: &'static str, code: String) -> Vec<ExecutionError> {
        let timeout = self.timeout;
        let (outcome, timed_out) = runtime::run_with_deadline(&mut self.js, timeout, |js| {
            eval_to_string(js, name, code)
        });

        if timed_out {
            let budget = timeout.map(|t| t.as_millis()).unwrap_or_default();
            return vec![ExecutionError::runtime(
                format!("script execution timed out after {}ms", budget),
                FragmentKind::Javascript,
            )];
        }

        match outcome.and_then(|json| parse_sandbox_errors(&json)) {
            Ok(errors) => errors
                .into_iter()
                .map(|error| error.into_execution_error(FragmentKind::Javascript))
                .collect(),
            Err(err) => vec![ExecutionError::runtime(
                err.to_string(),
                FragmentKind::Javascript,
            )],
        }
    }

    #[cfg(test)]
    fn managed_style_count(&self) -> usize {
        let dom = self.dom.borrow();
        let head = dom.head();
        dom.query_selector_all(head, "style")
            .map(|styles| styles.len())
            .unwrap_or(0)
    }
}
