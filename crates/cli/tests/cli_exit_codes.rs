use std::process::Command;

use tempfile::TempDir;

fn tessera(args: &[&str], socket: &std::path::Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tessera"))
        .args(args)
        .env("TESSERA_SOCKET", socket)
        .env_remove("RUST_LOG")
        .output()
        .expect("tessera binary should run")
}

#[test]
fn missing_daemon_exits_with_code_10() {
    let dir = TempDir::new().unwrap();
    let output = tessera(&["reserve", "notes/a.md", "--json"], &dir.path().join("daemon.sock"));

    assert_eq!(output.status.code(), Some(10));
    let stderr: serde_json::Value =
        serde_json::from_slice(&output.stderr).expect("json error on stderr");
    assert_eq!(stderr["error"]["code"], "DAEMON_NOT_RUNNING");
}

#[test]
fn usage_errors_exit_with_code_2() {
    let dir = TempDir::new().unwrap();
    let output = tessera(&["release"], &dir.path().join("daemon.sock"));
    assert_eq!(output.status.code(), Some(2));
}
