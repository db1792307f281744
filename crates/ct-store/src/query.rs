//! AND-connected command queries.
//!
//! Predicates target the interned column names in [`crate::schema::cols`]
//! with one of the shell-friendly comparison operators. The query selects
//! distinct command ids over a join of all related tables, then hydrates
//! each command with its env, session, and file-event rows.

use crate::connection::Store;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use ct_common::{CommandInfo, FileReadEvent, FileWriteEvent, HashValue, SessionUuid};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::PathBuf;

/// Comparison operators in their shell-friendly mnemonics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CmpOp {
    /// Parse `-eq`, `-gt`, ... as passed on the command line.
    pub fn parse_mnemonic(s: &str) -> Option<Self> {
        match s {
            "-eq" => Some(CmpOp::Eq),
            "-ne" => Some(CmpOp::Ne),
            "-lt" => Some(CmpOp::Lt),
            "-le" => Some(CmpOp::Le),
            "-gt" => Some(CmpOp::Gt),
            "-ge" => Some(CmpOp::Ge),
            "-like" => Some(CmpOp::Like),
            _ => None,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Like => "LIKE",
        }
    }
}

#[derive(Debug)]
struct Clause {
    column: &'static str,
    op: CmpOp,
    value: Value,
}

/// Builder for AND-connected command queries.
#[derive(Debug)]
pub struct CommandQuery {
    clauses: Vec<Clause>,
    match_all: bool,
    limit: Option<u32>,
    ascending: bool,
}

impl CommandQuery {
    pub fn new() -> Self {
        CommandQuery {
            clauses: Vec::new(),
            match_all: false,
            limit: None,
            ascending: true,
        }
    }

    pub fn add_text(&mut self, column: &'static str, op: CmpOp, value: String) {
        self.clauses.push(Clause {
            column,
            op,
            value: Value::Text(value),
        });
    }

    pub fn add_int(&mut self, column: &'static str, op: CmpOp, value: i64) {
        self.clauses.push(Clause {
            column,
            op,
            value: Value::Integer(value),
        });
    }

    /// Match every command (used by `history`).
    pub fn set_match_all(&mut self) {
        self.match_all = true;
    }

    pub fn set_limit(&mut self, limit: u32) {
        self.limit = Some(limit);
    }

    pub fn set_ascending(&mut self, ascending: bool) {
        self.ascending = ascending;
    }

    /// True when no predicate was added; such a query is refused by the CLI.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty() && !self.match_all
    }

    /// Run the query and hydrate the matching commands.
    pub fn run(&self, store: &Store) -> Result<Vec<StoredCommand>, StoreError> {
        let mut sql = String::from(
            "SELECT DISTINCT cmd.id FROM cmd \
             LEFT JOIN writtenFile ON writtenFile.cmdId = cmd.id \
             LEFT JOIN readFile ON readFile.cmdId = cmd.id \
             LEFT JOIN session ON session.id = cmd.sessionId \
             LEFT JOIN env ON env.id = cmd.envId",
        );
        let mut args: Vec<Value> = Vec::new();
        if !self.clauses.is_empty() {
            sql.push_str(" WHERE ");
            for (i, clause) in self.clauses.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                sql.push_str(clause.column);
                sql.push(' ');
                sql.push_str(clause.op.sql());
                sql.push_str(&format!(" ?{}", i + 1));
                args.push(clause.value.clone());
            }
        }
        sql.push_str(if self.ascending {
            " ORDER BY cmd.id ASC"
        } else {
            " ORDER BY cmd.id DESC"
        });
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = store.conn();
        let mut stmt = conn.prepare(&sql)?;
        let ids: Vec<i64> = stmt
            .query_map(params_from_iter(args), |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        ids.into_iter()
            .map(|id| fetch_command(conn, id))
            .collect()
    }
}

/// A written-file row as stored.
#[derive(Debug, Clone)]
pub struct StoredWrittenFile {
    pub id: i64,
    pub event: FileWriteEvent,
}

/// A read-file row as stored.
#[derive(Debug, Clone)]
pub struct StoredReadFile {
    pub id: i64,
    pub cmd_id: i64,
    pub event: FileReadEvent,
}

/// A command hydrated with its file-event rows.
#[derive(Debug, Clone)]
pub struct StoredCommand {
    pub info: CommandInfo,
    pub writes: Vec<StoredWrittenFile>,
    pub reads: Vec<StoredReadFile>,
}

fn timestamp_from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn fetch_command(conn: &Connection, id: i64) -> Result<StoredCommand, StoreError> {
    let info = conn.query_row(
        "SELECT cmd.txt, cmd.workingDirectory, cmd.startTime, cmd.endTime, \
                cmd.returnVal, cmd.sessionId, env.hostname, env.username \
         FROM cmd LEFT JOIN env ON env.id = cmd.envId WHERE cmd.id = ?1",
        params![id],
        |row| {
            let session: Option<String> = row.get(5)?;
            Ok(CommandInfo {
                id: Some(id),
                text: row.get(0)?,
                working_dir: PathBuf::from(row.get::<_, String>(1)?),
                start_time: timestamp_from_millis(row.get(2)?),
                end_time: Some(timestamp_from_millis(row.get(3)?)),
                return_val: row.get(4)?,
                session_uuid: session.as_deref().and_then(SessionUuid::parse),
                hostname: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                username: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            })
        },
    )?;

    let mut stmt = conn.prepare(
        "SELECT id, name, path, size, mtime, hash FROM writtenFile \
         WHERE cmdId = ?1 ORDER BY id",
    )?;
    let writes: Vec<StoredWrittenFile> = stmt
        .query_map(params![id], |row| {
            Ok(StoredWrittenFile {
                id: row.get(0)?,
                event: FileWriteEvent {
                    name: row.get(1)?,
                    path: PathBuf::from(row.get::<_, String>(2)?),
                    size: row.get::<_, i64>(3)? as u64,
                    mtime: row.get(4)?,
                    hash: row.get::<_, Option<i64>>(5)?.map(HashValue::from_i64),
                },
            })
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, name, path, size, mtime, bytes FROM readFile \
         WHERE cmdId = ?1 ORDER BY id",
    )?;
    let reads: Vec<StoredReadFile> = stmt
        .query_map(params![id], |row| {
            Ok(StoredReadFile {
                id: row.get(0)?,
                cmd_id: id,
                event: FileReadEvent {
                    name: row.get(1)?,
                    path: PathBuf::from(row.get::<_, String>(2)?),
                    size: row.get::<_, i64>(3)? as u64,
                    mtime: row.get(4)?,
                    bytes: row.get(5)?,
                },
            })
        })?
        .collect::<rusqlite::Result<_>>()?;

    Ok(StoredCommand { info, writes, reads })
}

impl Store {
    /// Fetch one read-file row by id, for restore.
    pub fn read_file_by_id(&self, id: i64) -> Result<Option<StoredReadFile>, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT cmdId, name, path, size, mtime, bytes FROM readFile WHERE id = ?1",
                params![id],
                |row| {
                    Ok(StoredReadFile {
                        id,
                        cmd_id: row.get(0)?,
                        event: FileReadEvent {
                            name: row.get(1)?,
                            path: PathBuf::from(row.get::<_, String>(2)?),
                            size: row.get::<_, i64>(3)? as u64,
                            mtime: row.get(4)?,
                            bytes: row.get(5)?,
                        },
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
