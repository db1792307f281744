//! The per-command record and its classified file events.
//!
//! A `CommandInfo` is created when the observed workload starts, mutated by
//! the classifier and the shell control protocol, and destroyed after its
//! terminal flush. Mid-command flushes assign the store id on first use and
//! update the row in place afterwards.

use crate::ids::{HashValue, SessionUuid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sentinel until the observed workload's exit status is known. Shell
/// observation mode may deliver it out-of-band or not at all.
pub const INVALID_RETURN_VAL: i32 = i32::MIN;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInfo {
    /// Store row id; absent until the first flush.
    pub id: Option<i64>,
    pub text: String,
    pub working_dir: PathBuf,
    pub start_time: DateTime<Utc>,
    /// Set when the observed workload finishes; a flush before that point
    /// persists the current time as a placeholder and updates it later.
    pub end_time: Option<DateTime<Utc>>,
    pub return_val: i32,
    pub session_uuid: Option<SessionUuid>,
    pub hostname: String,
    pub username: String,
}

impl CommandInfo {
    /// Build a record from the local environment: cwd, hostname, username,
    /// current time. Text and session are filled in by the caller.
    pub fn from_local_env() -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let hostname = nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from("unknown"));
        let username = nix::unistd::User::from_uid(nix::unistd::getuid())
            .ok()
            .flatten()
            .map(|u| u.name)
            .unwrap_or_else(|| String::from("unknown"));
        CommandInfo {
            id: None,
            text: String::new(),
            working_dir,
            start_time: Utc::now(),
            end_time: None,
            return_val: INVALID_RETURN_VAL,
            session_uuid: None,
            hostname,
            username,
        }
    }

    pub fn has_return_val(&self) -> bool {
        self.return_val != INVALID_RETURN_VAL
    }
}

/// A deduplicated write observation for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWriteEvent {
    /// Directory part of the absolute path.
    pub path: PathBuf,
    /// File name part.
    pub name: String,
    pub size: u64,
    /// Modification time, epoch seconds.
    pub mtime: i64,
    pub hash: Option<HashValue>,
}

/// A deduplicated read observation for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReadEvent {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mtime: i64,
    /// Captured body, present when the read policy stores bytes and the file
    /// fits the configured cap. Not serialized; the store keeps it in a BLOB
    /// column and display layers decide how much of it to show.
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
}

/// Split an absolute file path into the `(path, name)` pair persisted by the
/// store.
pub fn split_path(full: &std::path::Path) -> (PathBuf, String) {
    let name = full
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = full
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/"));
    (dir, name)
}
