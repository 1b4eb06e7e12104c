//! Standalone fragment validators, independent of any engine instance.
//!
//! `validate_css` is a pure scanner. `validate_html` runs the tolerant parser
//! against a scratch document and reports everything it had to repair.
//! `validate_javascript` spins up a throwaway isolate and compiles the source
//! with `new Function` without invoking it, the same pre-check the executor
//! performs.

use crate::dom::Document;
use crate::html;
use crate::runtime::{eval_to_string, js_string_literal};
use deno_core::{JsRuntime, RuntimeOptions};
use serde::Serialize;

/// Outcome of a standalone validation pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn new(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Lightweight syntactic CSS check.
///
/// Brace imbalance is an error; a declaration without a colon is only a
/// warning. The asymmetry is deliberate, observed reference behavior:
/// downstream consumers route errors and warnings to different panels.
pub fn validate_css(css: &str) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let mut depth = 0usize;
    for (position, ch) in css.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    errors.push(format!(
                        "too many closing braces (position {})",
                        position
                    ));
                    return ValidationResult::new(errors, warnings);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    if depth > 0 {
        errors.push("unclosed opening brace".to_string());
    }

    // Declarations: the text between each '{' and the next '}'.
    let mut rest = css;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open + 1..].find('}') else {
            break;
        };
        let body = &rest[open + 1..open + 1 + close];
        for declaration in body.split(';') {
            let declaration = declaration.trim();
            if !declaration.is_empty() && !declaration.contains(':') {
                warnings.push(format!("declaration '{}' is missing a colon", declaration));
            }
        }
        rest = &rest[open + 1 + close + 1..];
    }

    ValidationResult::new(errors, warnings)
}

/// Parse `html` tolerantly and report what a browser would silently repair.
///
/// Fragment parsing never hard-fails (the browser's parser is error-tolerant
/// and auto-corrects), so problems surface as warnings rather than errors.
pub fn validate_html(html: &str) -> ValidationResult {
    let mut doc = Document::new();
    let parsed = html::parse_fragment(&mut doc, html);
    let mut warnings = parsed.warnings;

    if html.to_ascii_lowercase().contains("<script") {
        warnings.push("script elements are removed before injection".to_string());
    }

    ValidationResult::new(Vec::new(), warnings)
}

/// Compile-only JavaScript syntax check in a throwaway isolate.
pub fn validate_javascript(js: &str) -> ValidationResult {
    let mut runtime = JsRuntime::new(RuntimeOptions::default());
    let code = format!(
        "(() => {{ try {{ new Function({source}); return \"\"; }} \
         catch (err) {{ return String((err && err.message) || err); }} }})()",
        source = js_string_literal(js)
    );

    let errors = match eval_to_string(&mut runtime, "<validate-js>", code) {
        Ok(message) if message.is_empty() => Vec::new(),
        Ok(message) => vec![message],
        Err(err) => vec![err.to_string()],
    };
    ValidationResult::new(errors, Vec::new())
}
