//! Store opening and lifetime.
//!
//! Opening creates the database file if absent, tightens the data directory
//! to owner-only on fresh creation, sets foreign keys on, and runs the
//! migration pass. The busy timeout is generous to tolerate slow network
//! filesystems.

use crate::error::StoreError;
use crate::migrate;
use crate::stored_files::{StoredFiles, STORED_FILES_DIR};
use rusqlite::Connection;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DB_FILE: &str = "database.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(15);

pub struct Store {
    conn: Connection,
    data_dir: PathBuf,
}

impl Store {
    /// Open the store in the default data directory.
    pub fn open_default() -> Result<Self, StoreError> {
        let dir = ct_common::config::data_dir().map_err(|e| StoreError::DataDir(e.to_string()))?;
        Self::open(&dir)
    }

    /// Open (creating if necessary) the store inside `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let fresh_dir = !data_dir.exists();
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io {
            path: data_dir.to_path_buf(),
            source: e,
        })?;
        if fresh_dir {
            // Command histories are private by default.
            let perms = std::fs::Permissions::from_mode(0o700);
            if let Err(e) = std::fs::set_permissions(data_dir, perms) {
                tracing::warn!(
                    "failed to set owner-only permissions on {}: {e}. \
                     Other users might be able to browse your command history.",
                    data_dir.display()
                );
            }
        }

        let db_path = data_dir.join(DB_FILE);
        let fresh_db = !db_path.exists();
        let mut conn = Connection::open(&db_path).map_err(|e| StoreError::Open {
            path: db_path.clone(),
            source: e,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // Must be set outside any transaction, see sqlite.org/foreignkeys.html.
        conn.pragma_update(None, "foreign_keys", true)?;

        migrate::prepare(&mut conn, fresh_db)?;

        Ok(Store {
            conn,
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Handle to the content-addressed archive next to the database.
    pub fn stored_files(&self) -> StoredFiles {
        StoredFiles::new(self.data_dir.join(STORED_FILES_DIR))
    }

    /// The schema version recorded in the database.
    pub fn version(&self) -> Result<String, StoreError> {
        let ver = self
            .conn
            .query_row("SELECT ver FROM version WHERE id = 1", [], |row| row.get(0))?;
        Ok(ver)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
