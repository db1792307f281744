//! End-to-end observation through the real engine binary.
//!
//! These flows need root, a working fanotify, and the msenter group; they
//! return early when the environment lacks any of that, in the spirit of a
//! skipped test.

use assert_cmd::Command;
use ct_common::config::{ENV_CONFIG_DIR, ENV_DATA_DIR, DEFAULT_MSENTER_GROUP};
use ct_common::{PathTree, Settings};
use ct_store::{CommandQuery, Store};
use std::path::Path;

fn harness_available() -> bool {
    if !nix::unistd::geteuid().is_root() {
        return false;
    }
    if nix::unistd::Group::from_name(DEFAULT_MSENTER_GROUP)
        .ok()
        .flatten()
        .is_none()
    {
        return false;
    }
    let fd = unsafe {
        libc::fanotify_init(
            libc::FAN_CLASS_NOTIF | libc::FAN_CLOEXEC,
            libc::O_RDONLY as libc::c_uint,
        )
    };
    if fd < 0 {
        return false;
    }
    unsafe { libc::close(fd) };
    true
}

struct Harness {
    _config: tempfile::TempDir,
    data: tempfile::TempDir,
    watched: std::path::PathBuf,
    config_dir: std::path::PathBuf,
}

fn harness(configure: impl FnOnce(&mut Settings, &Path)) -> Harness {
    let config = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let watched = tempfile::tempdir().unwrap().keep();

    let mut settings = Settings::default();
    settings.write_events.include = PathTree::from_paths([watched.clone()]);
    settings.read_events.include = PathTree::from_paths([watched.clone()]);
    configure(&mut settings, &watched);

    std::fs::write(
        config.path().join("config.json"),
        serde_json::to_string_pretty(&settings).unwrap(),
    )
    .unwrap();

    let config_dir = config.path().to_path_buf();
    Harness {
        _config: config,
        data,
        watched,
        config_dir,
    }
}

fn engine(h: &Harness) -> Command {
    let mut cmd = Command::cargo_bin("cmdtrail-run").unwrap();
    cmd.env(ENV_CONFIG_DIR, &h.config_dir);
    cmd.env(ENV_DATA_DIR, h.data.path());
    cmd
}

fn all_commands(h: &Harness) -> Vec<ct_store::StoredCommand> {
    let store = Store::open(h.data.path()).unwrap();
    let mut query = CommandQuery::new();
    query.set_match_all();
    query.run(&store).unwrap()
}

#[test]
fn single_write_is_recorded() {
    if !harness_available() {
        return;
    }
    let h = harness(|_, _| {});
    let target = h.watched.join("x");

    engine(&h)
        .arg("--")
        .arg("/bin/sh")
        .arg("-c")
        .arg(format!("echo hi > {}", target.display()))
        .assert()
        .code(0);

    let commands = all_commands(&h);
    assert_eq!(commands.len(), 1);
    let cmd = &commands[0];
    assert!(cmd.info.text.starts_with("/bin/sh -c"));
    assert_eq!(cmd.info.return_val, 0);
    assert!(cmd.info.start_time <= cmd.info.end_time.unwrap());

    let write = cmd
        .writes
        .iter()
        .find(|w| w.event.name == "x")
        .expect("written file row for x");
    assert_eq!(write.event.size, 3);
    assert_eq!(write.event.path, h.watched);
}

#[test]
fn excluded_subtree_is_not_recorded() {
    if !harness_available() {
        return;
    }
    let h = harness(|settings, watched| {
        settings.write_events.exclude = PathTree::from_paths([watched.join("private")]);
    });
    std::fs::create_dir(h.watched.join("private")).unwrap();

    engine(&h)
        .arg("--")
        .arg("/bin/sh")
        .arg("-c")
        .arg(format!(
            "echo a > {0}/private/a; echo b > {0}/b",
            h.watched.display()
        ))
        .assert()
        .code(0);

    let commands = all_commands(&h);
    assert_eq!(commands.len(), 1);
    let names: Vec<&str> = commands[0]
        .writes
        .iter()
        .map(|w| w.event.name.as_str())
        .collect();
    assert!(names.contains(&"b"));
    assert!(!names.contains(&"a"));
}

#[test]
fn killed_child_maps_to_128_plus_signal() {
    if !harness_available() {
        return;
    }
    let h = harness(|_, _| {});

    engine(&h)
        .arg("--")
        .arg("/bin/sh")
        .arg("-c")
        .arg("kill -9 $$")
        .assert()
        .code(137);

    let commands = all_commands(&h);
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].info.return_val, 137);
}
