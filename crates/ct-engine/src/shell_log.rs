//! Append-only log for the shell integration.
//!
//! `LOG_MESSAGE` frames land here, not in the engine's own log: the lines
//! originate in shell scripts and belong to the user's data directory.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SHELL_LOG_FILE: &str = "log_cmdtrail_shell_integration";

pub struct ShellIntegrationLog {
    path: PathBuf,
    file: Option<std::fs::File>,
}

impl ShellIntegrationLog {
    /// Best-effort open; a failure downgrades logging to a warning instead
    /// of aborting the observed session.
    pub fn open(data_dir: &Path) -> Self {
        let path = data_dir.join(SHELL_LOG_FILE);
        let file = match std::fs::create_dir_all(data_dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path))
        {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::warn!(
                    "cannot open shell-integration log at {}: {e}",
                    path.display()
                );
                None
            }
        };
        ShellIntegrationLog { path, file }
    }

    pub fn append_line(&mut self, bytes: &[u8]) {
        if let Some(file) = &mut self.file {
            if file
                .write_all(bytes)
                .and_then(|_| file.write_all(b"\n"))
                .is_err()
            {
                tracing::warn!("write to {} failed", self.path.display());
            }
        }
    }
}
