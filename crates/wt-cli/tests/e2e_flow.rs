//! End-to-end tests driving the `wt` binary.
//!
//! Every invocation is a fresh process, so each step also exercises
//! reconciliation from the database.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn wt_binary() -> String {
    env!("CARGO_BIN_EXE_wt").to_string()
}

fn write_config(temp: &Path) -> std::path::PathBuf {
    let config_path = temp.join("config.toml");
    let db_path = temp.join("data").join("wt.db");
    std::fs::write(
        &config_path,
        format!(
            "database_path = \"{}\"\nowner = \"alice\"\n",
            db_path.display().to_string().replace('\\', "\\\\")
        ),
    )
    .unwrap();
    config_path
}

fn wt(temp: &Path, config: &Path, args: &[&str]) -> Output {
    Command::new(wt_binary())
        .env("HOME", temp)
        .env_remove("XDG_CONFIG_HOME")
        .env_remove("WT_OWNER")
        .env_remove("WT_DATABASE_PATH")
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("failed to run wt")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn status_json(temp: &Path, config: &Path) -> serde_json::Value {
    let output = wt(temp, config, &["status", "--json"]);
    assert!(output.status.success(), "status failed: {}", stderr(&output));
    serde_json::from_slice(&output.stdout).expect("status --json should be valid JSON")
}

#[test]
fn test_full_session_lifecycle_across_processes() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let idle = status_json(temp.path(), &config);
    assert_eq!(idle["state"], "idle");
    assert_eq!(idle["owner"], "alice");

    let started = wt(temp.path(), &config, &["start"]);
    assert!(started.status.success(), "start failed: {}", stderr(&started));
    assert!(stdout(&started).starts_with("Started session "));

    let running = status_json(temp.path(), &config);
    assert_eq!(running["state"], "running");
    let session_id = running["session_id"].as_str().unwrap().to_string();

    let again = wt(temp.path(), &config, &["start"]);
    assert!(!again.status.success(), "second start should fail");
    assert!(
        stderr(&again).contains("already running"),
        "unexpected stderr: {}",
        stderr(&again)
    );

    let paused = wt(temp.path(), &config, &["pause"]);
    assert!(paused.status.success(), "pause failed: {}", stderr(&paused));
    assert_eq!(status_json(temp.path(), &config)["state"], "paused");

    let double_pause = wt(temp.path(), &config, &["pause"]);
    assert!(!double_pause.status.success());
    assert!(stderr(&double_pause).contains("cannot pause while paused"));

    let resumed = wt(temp.path(), &config, &["resume"]);
    assert!(resumed.status.success(), "resume failed: {}", stderr(&resumed));
    let running = status_json(temp.path(), &config);
    assert_eq!(running["state"], "running");
    assert_eq!(running["session_id"], session_id.as_str());

    let stopped = wt(temp.path(), &config, &["stop"]);
    assert!(stopped.status.success(), "stop failed: {}", stderr(&stopped));
    assert!(stdout(&stopped).contains("across 2 segment(s)"));

    let idle = status_json(temp.path(), &config);
    assert_eq!(idle["state"], "idle");
    assert!(idle["session_id"].is_null());

    let today = wt(temp.path(), &config, &["today", "--json"]);
    assert!(today.status.success(), "today failed: {}", stderr(&today));
    let today: serde_json::Value = serde_json::from_slice(&today.stdout).unwrap();
    let sessions = today["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], session_id.as_str());
    assert_eq!(sessions[0]["status"], "stopped");
    assert_eq!(sessions[0]["segments"].as_array().unwrap().len(), 2);
}

#[test]
fn test_invalid_transitions_from_idle_fail() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    for command in ["pause", "resume", "stop"] {
        let output = wt(temp.path(), &config, &[command]);
        assert!(!output.status.success(), "{command} should fail while idle");
        assert!(
            stderr(&output).contains(&format!("cannot {command} while idle")),
            "unexpected stderr for {command}: {}",
            stderr(&output)
        );
    }
    assert_eq!(status_json(temp.path(), &config)["state"], "idle");
}

#[test]
fn test_owners_are_tracked_separately() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let alice = wt(temp.path(), &config, &["start"]);
    assert!(alice.status.success(), "start failed: {}", stderr(&alice));

    let bob = wt(temp.path(), &config, &["start", "--owner", "bob"]);
    assert!(bob.status.success(), "bob start failed: {}", stderr(&bob));

    let bob_status = wt(temp.path(), &config, &["status", "--json", "--owner", "bob"]);
    let bob_status: serde_json::Value = serde_json::from_slice(&bob_status.stdout).unwrap();
    assert_eq!(bob_status["owner"], "bob");
    assert_eq!(bob_status["state"], "running");
    assert_ne!(
        bob_status["session_id"],
        status_json(temp.path(), &config)["session_id"]
    );
}

#[test]
fn test_no_subcommand_prints_help() {
    let output = Command::new(wt_binary()).output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("Usage"));
}
