//! Playground Engine CLI
//!
//! Single-shot mode:
//!   playground-engine <html-file> <css-file> <js-file>
//!
//! Server mode (persistent process, reads from stdin):
//!   playground-engine --server
//!
//! Protocol (server mode): one JSON request per line on stdin:
//!   {"html":"<p>hi</p>","css":"p { color: red; }","js":"console.log('x')"}
//!
//! Response (stdout):
//!   Status:Ok
//!   Length:1234
//!
//!   {"result":{...},"markup":"<p>hi</p>"}
//!
//! A failed execution still responds Status:Ok with `result.success` false;
//! Status:Error is reserved for malformed requests.

use anyhow::{anyhow, Result};
use playground_engine::{EngineConfig, ExecutionResult, PlaygroundEngine};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

fn print_usage() {
    eprintln!("Playground Engine - headless HTML/CSS/JS execution");
    eprintln!();
    eprintln!("Single-shot mode:");
    eprintln!("  playground-engine <html-file> <css-file> <js-file>");
    eprintln!();
    eprintln!("Server mode (persistent process):");
    eprintln!("  playground-engine --server");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  playground-engine page.html page.css page.js");
    eprintln!("  echo '{{\"html\":\"<p>hi</p>\",\"css\":\"\",\"js\":\"\"}}' | playground-engine --server");
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    html: String,
    #[serde(default)]
    css: String,
    #[serde(default)]
    js: String,
}

#[derive(Debug, Serialize)]
struct ExecuteResponse {
    result: ExecutionResult,
    markup: String,
}

/// Replay captured logs and errors to stderr, tagged by level and fragment.
fn report(result: &ExecutionResult) {
    for log in &result.console_logs {
        eprintln!("[{}] {}", log.level.tag(), log.message);
    }
    for error in &result.errors {
        let file = error
            .file
            .map(|f| format!("{:?}", f).to_lowercase())
            .unwrap_or_else(|| "engine".to_string());
        eprintln!("[{:?}:{}] {}", error.kind, file, error.message);
    }
}

/// Run in single-shot mode: read the three fragment files, execute them, and
/// return the rendered mount markup.
fn run_single_shot(html_path: &str, css_path: &str, js_path: &str) -> Result<String> {
    let read = |path: &str| -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| anyhow!("Failed to read '{}': {}", path, e))
    };
    let html = read(html_path)?;
    let css = read(css_path)?;
    let js = read(js_path)?;

    let mut engine = PlaygroundEngine::new(&EngineConfig::default());
    let result = engine.execute_all(&html, &css, &js);
    report(&result);

    if !result.success {
        return Err(anyhow!(
            "execution finished with {} error(s)",
            result.errors.len()
        ));
    }
    Ok(engine.container_html())
}

/// Run in server mode (persistent process, one JSON request per stdin line).
fn run_server() -> Result<()> {
    // Create the engine ONCE at startup (V8 cold start happens here).
    let mut engine = PlaygroundEngine::new(&EngineConfig::default());

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut reader = stdin.lock();

    eprintln!("[playground-engine] Server ready, reading from stdin...");

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            // EOF - stdin closed, exit gracefully
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: ExecuteRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                write_response(&mut stdout, false, &format!("Invalid request JSON: {}", err))?;
                continue;
            }
        };

        let result = engine.execute_all(&request.html, &request.css, &request.js);
        report(&result);

        let response = ExecuteResponse {
            result,
            markup: engine.container_html(),
        };
        let body = serde_json::to_string(&response)?;
        write_response(&mut stdout, true, &body)?;

        // Each request sees a fresh mount subtree and log buffer.
        engine.clear();
        engine.clear_logs();
    }

    eprintln!("[playground-engine] Server shutting down");
    Ok(())
}

/// Write response in length-prefixed protocol
fn write_response(stdout: &mut std::io::Stdout, ok: bool, body: &str) -> Result<()> {
    let status = if ok { "Ok" } else { "Error" };

    writeln!(stdout, "Status:{}", status)?;
    writeln!(stdout, "Length:{}", body.len())?;
    writeln!(stdout)?; // Empty line separator
    write!(stdout, "{}", body)?;
    stdout.flush()?;

    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Err(anyhow!("Missing required arguments"));
    }

    if args[1] == "--server" {
        return run_server();
    }

    if args.len() < 4 {
        print_usage();
        return Err(anyhow!("Missing required arguments"));
    }

    let markup = run_single_shot(&args[1], &args[2], &args[3])?;
    println!("{}", markup);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_single_shot_renders_markup() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("page.html");
        let css = dir.path().join("page.css");
        let js = dir.path().join("page.js");
        fs::write(&html, r#"<p id="out"></p>"#).unwrap();
        fs::write(&css, "p { color: red; }").unwrap();
        fs::write(&js, "document.getElementById('out').textContent = 'done';").unwrap();

        let markup = run_single_shot(
            html.to_str().unwrap(),
            css.to_str().unwrap(),
            js.to_str().unwrap(),
        )
        .unwrap();
        assert_eq!(markup, r#"<p id="out">done</p>"#);
    }

    #[test]
    fn test_single_shot_fails_on_bad_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("page.html");
        let css = dir.path().join("page.css");
        let js = dir.path().join("page.js");
        fs::write(&html, "<p></p>").unwrap();
        fs::write(&css, "p { color red").unwrap(); // unclosed brace
        fs::write(&js, "").unwrap();

        let err = run_single_shot(
            html.to_str().unwrap(),
            css.to_str().unwrap(),
            js.to_str().unwrap(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("1 error(s)"));
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = run_single_shot("/nonexistent.html", "/nonexistent.css", "/nonexistent.js")
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
