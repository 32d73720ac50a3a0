//! Integration tests for the origin-cache binary
//!
//! Runs the CLI as a subprocess against temporary cache roots.

use std::process::Command;

use tempfile::TempDir;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_origin-cache"))
        .args(args)
        .env_remove("ORIGIN_CACHE_PRODUCTION")
        .env_remove("K_SERVICE")
        .env_remove("ORIGIN_CACHE_BASE_URL")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute origin-cache")
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("origin-cache"), "Help should mention origin-cache");
    assert!(stdout.contains("fetch"), "Help should mention the fetch command");
    assert!(stdout.contains("sweep"), "Help should mention the sweep command");
}

#[test]
fn test_zero_ttl_prints_error_and_exits() {
    let output = run_cli(&["--ttl-hours", "0", "sweep"]);
    assert!(!output.status.success(), "Expected zero ttl to fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ttl-hours"), "Should name the bad flag: {}", stderr);
}

#[test]
fn test_sweep_on_empty_cache() {
    let root = TempDir::new().unwrap();
    let output = run_cli(&["sweep", "--storage-root", root.path().to_str().unwrap()]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Removed 0 expired entries"), "Unexpected output: {}", stdout);
}

#[test]
fn test_fetch_invalid_url_fails() {
    let root = TempDir::new().unwrap();
    let output = run_cli(&["fetch", "not a url", "--storage-root", root.path().to_str().unwrap()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid URL"), "Unexpected stderr: {}", stderr);
}

#[test]
fn test_fetch_replays_from_cache_across_invocations() {
    let root = TempDir::new().unwrap();
    let root_arg = root.path().to_str().unwrap();
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/greeting")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("ciao!")
        .expect(1)
        .create();
    let url = format!("{}/greeting", server.url());

    let first = run_cli(&["fetch", &url, "--storage-root", root_arg]);
    let second = run_cli(&["fetch", &url, "--storage-root", root_arg]);

    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert!(second.status.success(), "{}", String::from_utf8_lossy(&second.stderr));
    assert_eq!(first.stdout, b"ciao!");
    assert_eq!(second.stdout, b"ciao!");
    mock.assert();

    let cleared = run_cli(&["clear", "--storage-root", root_arg]);
    assert!(String::from_utf8_lossy(&cleared.stdout).contains("Removed 1 entries"));
}

#[test]
fn test_fetch_meta_prints_json() {
    let root = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/doc")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .create();
    let url = format!("{}/doc", server.url());

    let output = run_cli(&["fetch", &url, "--meta", "--storage-root", root.path().to_str().unwrap()]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let meta: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON metadata");
    assert_eq!(meta["status"], 200);
    assert_eq!(meta["content_type"], "application/json");
    assert_eq!(meta["url"], url.as_str());
}

#[test]
fn test_fetch_meta_relative_to_base_url() {
    let root = TempDir::new().unwrap();
    let mut server = mockito::Server::new();
    let _mock = server.mock("GET", "/api/doc").with_body("{}").create();
    let base = format!("{}/api/", server.url());

    let output = run_cli(&[
        "fetch",
        &format!("{base}doc"),
        "--meta",
        "--base-url",
        &base,
        "--storage-root",
        root.path().to_str().unwrap(),
    ]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let meta: serde_json::Value = serde_json::from_slice(&output.stdout).expect("JSON metadata");
    assert_eq!(meta["url"], "doc");
}

#[cfg(test)]
mod unit_tests {
    //! Unit tests for CLI parsing that don't require running the binary

    use clap::Parser;
    use origin_cache::cli::{Cli, Command};

    #[test]
    fn test_cli_fetch_with_meta() {
        let cli = Cli::parse_from(["origin-cache", "fetch", "https://example.org/a", "--meta"]);
        assert_eq!(
            cli.command,
            Command::Fetch {
                url: "https://example.org/a".to_string(),
                meta: true
            }
        );
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["origin-cache"]).is_err());
    }

    #[test]
    fn test_cli_rejects_non_numeric_ttl() {
        assert!(Cli::try_parse_from(["origin-cache", "--ttl-hours", "soon", "sweep"]).is_err());
    }
}
