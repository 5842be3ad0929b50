//! Black-box tests of the `svcheck` binary.

#![cfg(feature = "cli")]

mod common;

use std::time::Duration;

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: svcheck <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
    for subcommand in ["run", "file", "tcp", "memory", "completions"] {
        assert!(
            result.stdout.contains(subcommand),
            "help does not list {subcommand}; log: {}",
            result.log_path.display()
        );
    }
}

#[test]
fn version_command_prints_version() {
    let result = common::run_cli_case("version_command_prints_version", &["--version"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stdout.starts_with("svcheck "),
        "missing version output; log: {}",
        result.log_path.display()
    );
}

#[test]
fn completions_are_generated_for_bash() {
    let result = common::run_cli_case("completions_are_generated_for_bash", &["completions", "bash"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("svcheck"), "log: {}", result.log_path.display());
}

#[test]
fn missing_config_file_is_a_startup_error() {
    let result = common::run_cli_case(
        "missing_config_file_is_a_startup_error",
        &["run", "--config", "/nonexistent/svcheck.toml"],
    );
    assert!(!result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stderr.contains("[SCK-1002]"),
        "expected missing-config code; log: {}",
        result.log_path.display()
    );
    assert!(result.stdout.is_empty(), "no handshake before startup succeeds");
}

#[test]
fn unknown_check_type_is_a_startup_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("svcheck.toml");
    std::fs::write(
        &path,
        "name = \"web_check\"\ngroup = \"web\"\n\n[[checks]]\ntype = \"xmlrpc\"\n",
    )
    .expect("write config");
    let result = common::run_cli_case_with(
        "unknown_check_type_is_a_startup_error",
        &["run", "--config", path.to_str().expect("utf8 path")],
        &[("SUPERVISOR_SERVER_URL", "http://127.0.0.1:9".to_string())],
        "",
    );
    assert!(!result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stderr.contains("[SCK-4002]"),
        "log: {}",
        result.log_path.display()
    );
}

#[test]
fn shortcut_without_target_is_rejected() {
    let result = common::run_cli_case(
        "shortcut_without_target_is_rejected",
        &["memory", "-n", "mem_check", "-m", "1024"],
    );
    assert!(!result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stderr.contains("[SCK-1001]"),
        "log: {}",
        result.log_path.display()
    );
}

#[test]
fn missing_server_url_is_a_startup_error() {
    let result = common::run_cli_case(
        "missing_server_url_is_a_startup_error",
        &["tcp", "-n", "web_check", "-g", "web", "-p", "8080"],
    );
    assert!(!result.status.success(), "log: {}", result.log_path.display());
    assert!(
        result.stderr.contains("SUPERVISOR_SERVER_URL"),
        "log: {}",
        result.log_path.display()
    );
}

#[test]
fn failing_tcp_check_restarts_process_through_xml_rpc() {
    let supervisord = common::FakeSupervisord::start(&[("web_1", 20)], Duration::from_secs(20));
    let port = common::closed_port().to_string();
    let stdin = common::tick_frame("TICK_60");

    let result = common::run_cli_case_with(
        "failing_tcp_check_restarts_process_through_xml_rpc",
        &[
            "tcp", "-n", "web_check", "-g", "web", "-p", &port, "--host", "127.0.0.1", "-t", "1",
            "-r", "0",
        ],
        &[("SUPERVISOR_SERVER_URL", supervisord.url.clone())],
        &stdin,
    );
    let methods = supervisord.finish();

    assert!(
        result.status.success(),
        "closed stdin is a clean stop; log: {}",
        result.log_path.display()
    );
    assert_eq!(result.stdout, "READY\nRESULT 2\nOKREADY\n");
    assert_eq!(
        methods,
        [
            "supervisor.getAllProcessInfo",
            "supervisor.getProcessInfo",
            "supervisor.stopProcess",
            "supervisor.startProcess",
        ]
    );
    assert!(
        result.stderr.contains("[web_check] tcp check failed for process web_1. Trying to restart."),
        "log: {}",
        result.log_path.display()
    );
    assert!(result.stderr.contains("Event channel closed by the control plane."));
    assert!(result.stderr.trim_end().ends_with("Done."));
}
