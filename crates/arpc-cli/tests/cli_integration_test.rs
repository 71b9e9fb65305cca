//! CLI Integration Tests
//!
//! Runs the `arpc` binary:
//! 1. URL validation (http:// prefix requirement)
//! 2. JSON argument validation
//! 3. `demo` serving requests made by `call` and `atomic`
//!
//! Test URLs use `http://127.0.0.1:PORT`.

use std::net::TcpStream;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

fn arpc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_arpc"))
}

fn run(args: &[&str]) -> Output {
    arpc().args(args).output().unwrap()
}

/// Picks a port that was free a moment ago.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// A `demo` server process, killed on drop.
struct DemoServer {
    child: Child,
    url: String,
}

impl DemoServer {
    fn start(extra: &[&str]) -> Self {
        let port = free_port();
        let bind = format!("127.0.0.1:{}", port);
        let child = arpc()
            .args(["demo", "--bind", bind.as_str()])
            .args(extra)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while TcpStream::connect(&bind).is_err() {
            assert!(Instant::now() < deadline, "demo server did not start on {}", bind);
            std::thread::sleep(Duration::from_millis(50));
        }

        Self {
            child,
            url: format!("http://{}", bind),
        }
    }
}

impl Drop for DemoServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

// ============================================================================
// Argument Validation Tests
// ============================================================================

#[test]
fn test_call_missing_http_prefix() {
    let output = run(&["call", "127.0.0.1:8080", "echo.string", "\"x\""]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("must start with http:// or https://"));
}

#[test]
fn test_call_invalid_json_argument() {
    let output = run(&["call", "http://127.0.0.1:8080", "echo.string", "{nope"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid JSON"));
}

#[test]
fn test_atomic_requires_array() {
    let output = run(&["atomic", "http://127.0.0.1:8080", "{\"a\": 1}"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("JSON array"));
}

// ============================================================================
// Demo Server Tests
// ============================================================================

#[test]
fn test_demo_call_and_atomic() {
    let server = DemoServer::start(&[]);

    let output = run(&["call", &server.url, "echo.string", "\"hello\""]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "\"hello\"");

    let output = run(&["call", &server.url, "echo.string", "\"hello\"", "--get"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "\"hello\"");

    let program = r#"[["echo.string", "hello", "result"], [["result"], "echo.string"]]"#;
    let output = run(&["atomic", &server.url, program]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "[\"hello\",\"hello\"]");
}

#[test]
fn test_demo_reports_remote_errors() {
    let server = DemoServer::start(&[]);

    let output = run(&["call", &server.url, "missing.route", "1"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ROUTE_NOT_FOUND"));
}

#[test]
fn test_demo_with_api_key() {
    let server = DemoServer::start(&["--api-key", "secret"]);

    let output = run(&["call", &server.url, "whoami"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("UNAUTHENTICATED"));

    let output = run(&["call", &server.url, "whoami", "--token", "secret"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "\"demo\"");
}
