#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/ipcshare-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            panic!("socket {} never appeared", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn ipcshare() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_ipcshare"));
    command.arg("--log-level").arg("error");
    command
}

#[test]
fn selftest_passes_over_memory_pipes() {
    let output = ipcshare()
        .args(["--format", "json", "selftest", "--channels", "2", "--calls", "20"])
        .output()
        .expect("selftest should run");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "selftest failed: {stdout}");
    assert!(stdout.contains("\"transport\":\"memory\""));
    assert!(stdout.contains("\"overall\":\"pass\""));
    for check in ["handshake", "echo", "overloads", "faults", "close"] {
        assert!(stdout.contains(&format!("\"name\":\"{check}\"")), "missing {check}");
    }
}

#[test]
fn selftest_passes_over_unix_socket_pair() {
    let output = ipcshare()
        .args(["--format", "raw", "selftest", "--uds", "--calls", "10"])
        .output()
        .expect("selftest should run");

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "pass");
}

#[test]
fn call_reaches_counter_hosted_by_serve() {
    let dir = unique_temp_dir("serve");
    let sock_path = dir.join("share.sock");

    let mut child = ipcshare()
        .arg("serve")
        .arg(&sock_path)
        .arg("--once")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("serve command should start");

    wait_for_socket(&sock_path, Duration::from_secs(3));

    let output = ipcshare()
        .args(["--format", "raw", "call"])
        .arg(&sock_path)
        .args(["Counter", "increment", "--ctor", "i64:41"])
        .output()
        .expect("call should run");

    assert!(
        output.status.success(),
        "call failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "42");

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().expect("serve status should be readable") {
            break status;
        }
        if start.elapsed() >= Duration::from_secs(5) {
            let _ = child.kill();
            panic!("serve --once did not exit after the peer left");
        }
        thread::sleep(Duration::from_millis(25));
    };
    assert!(status.success());
    assert!(!sock_path.exists(), "socket file should be removed");

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn call_reports_remote_faults() {
    let dir = unique_temp_dir("fault");
    let sock_path = dir.join("share.sock");

    let mut child = ipcshare()
        .arg("serve")
        .arg(&sock_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");

    wait_for_socket(&sock_path, Duration::from_secs(3));

    let output = ipcshare()
        .arg("call")
        .arg(&sock_path)
        .args(["Counter", "divide", "--arg", "i64:0"])
        .output()
        .expect("call should run");

    let _ = child.kill();
    let _ = child.wait();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("DivideByZero"), "unexpected stderr: {stderr}");

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn malformed_argument_is_a_usage_error() {
    let output = ipcshare()
        .args(["call", "/tmp/ipcshare-missing.sock", "Counter", "add", "--arg", "nope"])
        .output()
        .expect("call should run");

    assert_eq!(output.status.code(), Some(64));
}
