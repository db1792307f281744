//! Command and file-event persistence.

use crate::connection::Store;
use crate::error::StoreError;
use rusqlite::{params, Connection, OptionalExtension};
use ct_common::{CommandInfo, FileReadEvent, FileWriteEvent};
use std::path::Path;

fn path_str(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn ensure_env(conn: &Connection, hostname: &str, username: &str) -> Result<i64, StoreError> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM env WHERE hostname = ?1 AND username = ?2",
            params![hostname, username],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO env (hostname, username) VALUES (?1, ?2)",
        params![hostname, username],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Store {
    /// Insert a new command row and return its id.
    pub fn add_command(&mut self, info: &CommandInfo) -> Result<i64, StoreError> {
        let tx = self.conn_mut().transaction()?;
        let env_id = ensure_env(&tx, &info.hostname, &info.username)?;
        let session_id = match &info.session_uuid {
            Some(uuid) => {
                let s = uuid.to_string();
                tx.execute("INSERT OR IGNORE INTO session (id) VALUES (?1)", params![s])?;
                Some(s)
            }
            None => None,
        };
        let end_time = info.end_time.unwrap_or(info.start_time);
        tx.execute(
            "INSERT INTO cmd (txt, workingDirectory, startTime, endTime, returnVal, sessionId, envId) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                info.text,
                path_str(&info.working_dir),
                info.start_time.timestamp_millis(),
                end_time.timestamp_millis(),
                info.return_val,
                session_id,
                env_id,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Update a command row previously inserted by [`Store::add_command`].
    pub fn update_command(&mut self, info: &CommandInfo) -> Result<(), StoreError> {
        let id = match info.id {
            Some(id) => id,
            None => {
                return Err(StoreError::Sql(rusqlite::Error::InvalidQuery));
            }
        };
        let end_time = info.end_time.unwrap_or(info.start_time);
        self.conn().execute(
            "UPDATE cmd SET txt = ?1, workingDirectory = ?2, startTime = ?3, \
             endTime = ?4, returnVal = ?5 WHERE id = ?6",
            params![
                info.text,
                path_str(&info.working_dir),
                info.start_time.timestamp_millis(),
                end_time.timestamp_millis(),
                info.return_val,
                id,
            ],
        )?;
        Ok(())
    }

    /// Insert the read and write sets of one command in a single
    /// transaction.
    pub fn add_file_events(
        &mut self,
        cmd_id: i64,
        writes: &[FileWriteEvent],
        reads: &[FileReadEvent],
    ) -> Result<(), StoreError> {
        let tx = self.conn_mut().transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO writtenFile (cmdId, name, path, size, mtime, hash) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for w in writes {
                stmt.execute(params![
                    cmd_id,
                    w.name,
                    path_str(&w.path),
                    w.size as i64,
                    w.mtime,
                    w.hash.map(|h| h.as_i64()),
                ])?;
            }
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO readFile (cmdId, name, path, size, mtime, bytes) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in reads {
                stmt.execute(params![
                    cmd_id,
                    r.name,
                    path_str(&r.path),
                    r.size as i64,
                    r.mtime,
                    r.bytes,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
