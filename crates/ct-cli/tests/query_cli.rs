//! End-to-end query CLI flows against a seeded store.

use assert_cmd::Command;
use chrono::Utc;
use ct_common::{CommandInfo, FileReadEvent, FileWriteEvent, HashValue, SessionUuid};
use ct_store::Recorder;
use predicates::prelude::*;
use std::path::PathBuf;

struct Seeded {
    data: tempfile::TempDir,
}

fn seed() -> Seeded {
    let data = tempfile::tempdir().unwrap();
    let mut recorder = Recorder::new(Some(data.path().to_path_buf()));

    let now = Utc::now();
    let mut cmd = CommandInfo {
        id: None,
        text: "/bin/sh -c echo hi > /tmp/x".into(),
        working_dir: PathBuf::from("/home/user"),
        start_time: now,
        end_time: Some(now),
        return_val: 0,
        session_uuid: Some(SessionUuid::generate()),
        hostname: "box".into(),
        username: "user".into(),
    };
    recorder.flush(
        &mut cmd,
        vec![FileWriteEvent {
            path: PathBuf::from("/tmp"),
            name: "x".into(),
            size: 3,
            mtime: 1_700_000_000,
            hash: Some(HashValue(0xfeed)),
        }],
        vec![],
    );

    let mut big = CommandInfo {
        text: "dd of=/tmp/big".into(),
        ..cmd_template(now)
    };
    recorder.flush(
        &mut big,
        vec![FileWriteEvent {
            path: PathBuf::from("/tmp"),
            name: "big".into(),
            size: 20 * 1024,
            mtime: 1_700_000_100,
            hash: None,
        }],
        vec![],
    );

    let mut reader = CommandInfo {
        text: "bash ./script.sh".into(),
        ..cmd_template(now)
    };
    recorder.flush(
        &mut reader,
        vec![],
        vec![FileReadEvent {
            path: PathBuf::from("/home/user"),
            name: "script.sh".into(),
            size: 22,
            mtime: 1_700_000_200,
            bytes: Some(b"#!/bin/sh\necho line2\n".to_vec()),
        }],
    );

    Seeded { data }
}

fn cmd_template(now: chrono::DateTime<Utc>) -> CommandInfo {
    CommandInfo {
        id: None,
        text: String::new(),
        working_dir: PathBuf::from("/home/user"),
        start_time: now,
        end_time: Some(now),
        return_val: 0,
        session_uuid: None,
        hostname: "box".into(),
        username: "user".into(),
    }
}

fn cli(seeded: &Seeded) -> Command {
    let mut cmd = Command::cargo_bin("cmdtrail").unwrap();
    cmd.arg("query").arg("--data-dir").arg(seeded.data.path());
    cmd
}

#[test]
fn history_lists_recent_commands() {
    let seeded = seed();
    cli(&seeded)
        .args(["--history", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("echo hi"))
        .stdout(predicate::str::contains("dd of=/tmp/big"));
}

#[test]
fn wname_finds_the_writing_command() {
    let seeded = seed();
    cli(&seeded)
        .args(["--wname", "x"])
        .assert()
        .success()
        .stdout(predicate::str::contains("echo hi"))
        .stdout(predicate::str::contains("dd of=/tmp/big").not());
}

#[test]
fn wsize_with_operator_mnemonic() {
    let seeded = seed();
    cli(&seeded)
        .args(["--wsize", "-gt", "10KiB"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dd of=/tmp/big"))
        .stdout(predicate::str::contains("echo hi").not());
}

#[test]
fn whash_equality() {
    let seeded = seed();
    cli(&seeded)
        .args(["--whash", "0xfeed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("echo hi"));
}

#[test]
fn rname_shows_preview_lines() {
    let seeded = seed();
    cli(&seeded)
        .args(["--rname", "script.sh", "--max-rfile-lines", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#!/bin/sh"))
        .stdout(predicate::str::contains("echo line2").not());
}

#[test]
fn json_output_is_parsable() {
    let seeded = seed();
    let output = cli(&seeded)
        .args(["--wname", "x", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let commands = parsed.as_array().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(
        commands[0]["written_files"][0]["name"].as_str().unwrap(),
        "x"
    );
    assert_eq!(commands[0]["return_val"].as_i64().unwrap(), 0);
}

#[test]
fn empty_query_is_refused() {
    let seeded = seed();
    cli(&seeded)
        .assert()
        .failure()
        .stderr(predicate::str::contains("empty query"));
}

#[test]
fn unknown_operator_is_rejected() {
    // "-approx" is no operator mnemonic, so it is not fused with the value
    // and the invocation fails to parse.
    let seeded = seed();
    cli(&seeded)
        .args(["--wsize", "-approx", "10KiB"])
        .assert()
        .failure();
}

#[test]
fn restore_rfiles_at_writes_bodies() {
    let seeded = seed();
    let restore = tempfile::tempdir().unwrap();
    cli(&seeded)
        .args(["--rname", "script.sh"])
        .arg("--restore-rfiles-at")
        .arg(restore.path())
        .assert()
        .success();

    let restored: Vec<PathBuf> = walk(restore.path());
    let script = restored
        .iter()
        .find(|p| p.file_name().is_some_and(|n| n == "script.sh"))
        .expect("restored script.sh");
    assert_eq!(
        std::fs::read(script).unwrap(),
        b"#!/bin/sh\necho line2\n".to_vec()
    );
}

#[test]
fn restore_rfile_id_into_cwd() {
    let seeded = seed();
    let cwd = tempfile::tempdir().unwrap();

    // Find the read-file id via JSON output first.
    let output = cli(&seeded)
        .args(["--rname", "script.sh", "--format", "json"])
        .output()
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rfile_id = parsed[0]["read_files"][0]["id"].as_i64().unwrap();

    cli(&seeded)
        .args(["--restore-rfile-id", &rfile_id.to_string()])
        .current_dir(cwd.path())
        .assert()
        .success();
    assert!(cwd.path().join("script.sh").exists());
}

fn walk(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk(&path));
        } else {
            out.push(path);
        }
    }
    out
}
