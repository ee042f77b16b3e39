//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "tests"
//! ems_type: "source"
//! ems_scope: "test"
//! ems_description: "Process-level checks of the daemon binary."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn daemon() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_r-bmsd"));
    command.env_remove("R_BMS_CONFIG").env_remove("R_BMS_LOG");
    command
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("r-bms.toml");
    let contents = format!(
        "[bus]\ninterface = \"virtual0\"\n\n[recorder]\nroot = {root:?}\n\n[api]\nlisten = \"127.0.0.1:0\"\n\n[logging]\ndirectory = {logs:?}\n\n[shutdown]\ngrace_period = 0\n",
        root = dir.join("data").display().to_string(),
        logs = dir.join("logs").display().to_string(),
    );
    fs::write(&path, contents).unwrap();
    path
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn version_flag_prints_and_exits() {
    let output = daemon().arg("-v").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("r-bmsd {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn missing_kernel_interface_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = daemon()
        .arg("--config")
        .arg(&config)
        .args(["--if", "nosuchcan9"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(
        stderr(&output).contains("failed to open bus nosuchcan9"),
        "{}",
        stderr(&output)
    );
}

#[test]
fn blank_interface_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = daemon()
        .arg("--config")
        .arg(&config)
        .args(["--if", " "])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn zero_retention_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = daemon()
        .arg("--config")
        .arg(&config)
        .args(["-r", "0"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(stderr(&output).contains("retention_days"), "{}", stderr(&output));
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = daemon()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[cfg(unix)]
#[test]
fn terminate_signal_stops_cleanly() {
    use std::thread::sleep;
    use std::time::{Duration, Instant};

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let mut child = daemon()
        .arg("--config")
        .arg(&config)
        .arg("--simulate")
        .spawn()
        .unwrap();

    // The log directory appears once tracing is up; signal handlers follow shortly after.
    let deadline = Instant::now() + Duration::from_secs(10);
    while !dir.path().join("logs").exists() && Instant::now() < deadline {
        sleep(Duration::from_millis(50));
    }
    sleep(Duration::from_millis(500));

    let killed = Command::new("kill")
        .args(["-TERM", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            child.kill().unwrap();
            panic!("daemon did not stop after SIGTERM");
        }
        sleep(Duration::from_millis(50));
    };
    assert!(status.success(), "{status:?}");
}
