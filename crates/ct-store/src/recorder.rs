//! The command recorder: terminal and mid-command flushes.
//!
//! The recorder owns the lazily opened store handle. A flush inserts the
//! command row on first use (assigning the id), updates it afterwards, and
//! persists the accumulated read/write sets in one transaction. Store
//! failures are logged and the batch is dropped; a long shell session must
//! not livelock on a full disk.

use crate::connection::Store;
use crate::error::StoreError;
use chrono::Utc;
use ct_common::{CommandInfo, FileReadEvent, FileWriteEvent};
use std::path::PathBuf;

pub struct Recorder {
    data_dir: Option<PathBuf>,
    store: Option<Store>,
}

impl Recorder {
    /// `data_dir` overrides the default data directory (used by tests and
    /// the `--data-dir` flag).
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        Recorder {
            data_dir,
            store: None,
        }
    }

    fn store(&mut self) -> Result<&mut Store, StoreError> {
        let store = match self.store.take() {
            Some(store) => store,
            None => match &self.data_dir {
                Some(dir) => Store::open(dir)?,
                None => Store::open_default()?,
            },
        };
        Ok(self.store.insert(store))
    }

    /// Flush the given event sets for `cmd`. Events are consumed either way;
    /// on store failure they are lost and an error is logged.
    pub fn flush(
        &mut self,
        cmd: &mut CommandInfo,
        writes: Vec<FileWriteEvent>,
        reads: Vec<FileReadEvent>,
    ) {
        if let Err(e) = self.try_flush(cmd, &writes, &reads) {
            tracing::error!("failed to store file events (they are lost): {e}");
        }
    }

    fn try_flush(
        &mut self,
        cmd: &mut CommandInfo,
        writes: &[FileWriteEvent],
        reads: &[FileReadEvent],
    ) -> Result<(), StoreError> {
        let store = self.store()?;
        match cmd.id {
            None => {
                if cmd.end_time.is_none() {
                    // Mid-command flush: persist a placeholder, the terminal
                    // flush updates it.
                    cmd.end_time = Some(Utc::now());
                }
                cmd.id = Some(store.add_command(cmd)?);
            }
            Some(_) => store.update_command(cmd)?,
        }

        let stored_files = store.stored_files();
        stored_files.mkpath().map_err(|e| StoreError::Io {
            path: stored_files.root().to_path_buf(),
            source: e,
        })?;

        if let Some(id) = cmd.id {
            store.add_file_events(id, writes, reads)?;
        }
        Ok(())
    }
}
