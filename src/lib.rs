//! # Playground Engine
//!
//! A headless execution engine for a code-playground: takes untrusted HTML,
//! CSS, and JavaScript text, executes it against an isolated mount subtree,
//! captures console output as structured records, classifies errors, and
//! returns a structured result without ever throwing across its own boundary.
//!
//! ## Isolation model
//!
//! - **JavaScript** runs in a per-instance V8 isolate (deno_core). Inside it,
//!   the user source is compiled with `new Function` and invoked with
//!   restricted `document`/`window`/`console` shims scoped to the mount
//!   subtree. This is best-effort isolation for a learning tool, **not** a
//!   security boundary: sandboxed code is constrained only by which object
//!   references it is handed (plus the isolate's heap limit and the
//!   wall-clock watchdog).
//! - **HTML** is stripped of `<script>` elements and injected into the mount
//!   subtree through an error-tolerant parser that auto-corrects malformed
//!   markup the way a browser would.
//! - **CSS** is syntax-checked, then applied through a single managed
//!   `<style>` node in the document head - replaced, never accumulated.
//!
//! Console capture is scoped: the console shim handed to sandboxed code
//! writes into the engine's own buffer, so no process-global state is
//! mutated and each call's `consoleLogs` is an exact slice.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use playground_engine::{EngineConfig, PlaygroundEngine};
//!
//! let mut engine = PlaygroundEngine::new(&EngineConfig::default());
//! let result = engine.execute_all(
//!     "<button id=\"go\">Go</button>",
//!     "button { color: rebeccapurple; }",
//!     "document.getElementById('go').addEventListener('click', () => console.log('clicked'));",
//! );
//! assert!(result.success);
//!
//! // Headless substitutes for real DOM interaction and the event loop:
//! engine.dispatch_event("#go", "click");
//! engine.advance_time(0);
//! println!("{}", engine.container_html());
//! ```

mod dom;
mod engine;
mod html;
mod ops;
mod result;
mod runtime;
mod validate;

pub use engine::PlaygroundEngine;
pub use result::{
    ConsoleLog, ErrorKind, ExecutionError, ExecutionResult, FragmentKind, LogLevel,
};
pub use runtime::EngineConfig;
pub use validate::{validate_css, validate_html, validate_javascript, ValidationResult};
