//! Forward-only schema migrations.
//!
//! The `version` table holds the application version that last touched the
//! database. On open, every migration introduced after the stored version
//! (and no later than the running application) is applied inside the same
//! transaction, then the stored version is bumped. Downgrades warn but do
//! not fail: newer schemas are kept untouched.

use crate::error::StoreError;
use crate::schema::SCHEMA_SQL;
use rusqlite::{params, Connection};

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

type VersionTriple = (u32, u32, u32);

pub fn parse_version(s: &str) -> Option<VersionTriple> {
    let mut parts = s.trim().splitn(3, '.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = match parts.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    Some((major, minor, patch))
}

struct Migration {
    /// Application version that introduced this step.
    introduced: VersionTriple,
    describe: &'static str,
    apply: fn(&Connection) -> rusqlite::Result<()>,
}

const MIGRATIONS: &[Migration] = &[Migration {
    introduced: (0, 2, 0),
    describe: "add cmd.comment",
    apply: add_cmd_comment,
}];

fn add_cmd_comment(conn: &Connection) -> rusqlite::Result<()> {
    if !table_has_column(conn, "cmd", "comment")? {
        conn.execute("ALTER TABLE cmd ADD COLUMN comment TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Create or upgrade the schema. Runs inside one transaction.
pub fn prepare(conn: &mut Connection, fresh: bool) -> Result<(), StoreError> {
    let tx = conn.transaction()?;

    if fresh {
        tracing::info!("creating new store at schema version {APP_VERSION}");
        tx.execute_batch(SCHEMA_SQL)?;
        tx.execute(
            "INSERT INTO version (id, ver) VALUES (1, ?1)",
            params![APP_VERSION],
        )?;
        tx.commit()?;
        return Ok(());
    }

    let db_ver_str: String =
        tx.query_row("SELECT ver FROM version WHERE id = 1", [], |row| row.get(0))?;
    let db_ver =
        parse_version(&db_ver_str).ok_or_else(|| StoreError::VersionParse(db_ver_str.clone()))?;
    let app_ver = parse_version(APP_VERSION)
        .ok_or_else(|| StoreError::VersionParse(APP_VERSION.to_string()))?;

    if db_ver > app_ver {
        tracing::warn!(
            "the store version ({db_ver_str}) is higher than the application \
             version ({APP_VERSION}). Downgrades are not supported, things may \
             go wrong. Please update cmdtrail on this machine."
        );
        tx.commit()?;
        return Ok(());
    }

    if db_ver < app_ver {
        for step in MIGRATIONS {
            if step.introduced > db_ver && step.introduced <= app_ver {
                tracing::info!("applying store migration: {}", step.describe);
                (step.apply)(&tx)?;
            }
        }
        tx.execute(
            "REPLACE INTO version (id, ver) VALUES (1, ?1)",
            params![APP_VERSION],
        )?;
    }

    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parse() {
        assert_eq!(parse_version("0.2.0"), Some((0, 2, 0)));
        assert_eq!(parse_version("1.12"), Some((1, 12, 0)));
        assert_eq!(parse_version("x.y"), None);
    }

    #[test]
    fn version_ordering_is_lexicographic_on_triples() {
        assert!(parse_version("0.2.0") > parse_version("0.1.9"));
        assert!(parse_version("1.0.0") > parse_version("0.99.0"));
    }

    #[test]
    fn app_version_parses() {
        assert!(parse_version(APP_VERSION).is_some());
    }
}
