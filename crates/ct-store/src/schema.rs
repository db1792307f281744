//! Database schema and the interned column names used by the query builder.

/// Schema applied to a freshly created database. Existing databases reach
/// the same shape via the forward migrations in [`crate::migrate`].
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE env (
    id INTEGER PRIMARY KEY,
    hostname TEXT NOT NULL,
    username TEXT NOT NULL,
    UNIQUE(hostname, username)
);

CREATE TABLE session (
    id TEXT PRIMARY KEY,
    comment TEXT
);

CREATE TABLE cmd (
    id INTEGER PRIMARY KEY,
    txt TEXT NOT NULL,
    workingDirectory TEXT NOT NULL,
    comment TEXT,
    startTime INTEGER NOT NULL,
    endTime INTEGER NOT NULL,
    returnVal INTEGER NOT NULL,
    sessionId TEXT REFERENCES session(id),
    envId INTEGER REFERENCES env(id)
);

CREATE INDEX idx_cmd_session ON cmd(sessionId);
CREATE INDEX idx_cmd_endtime ON cmd(endTime);

CREATE TABLE writtenFile (
    id INTEGER PRIMARY KEY,
    cmdId INTEGER NOT NULL REFERENCES cmd(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    hash INTEGER
);

CREATE INDEX idx_wfile_cmd ON writtenFile(cmdId);
CREATE INDEX idx_wfile_hash ON writtenFile(hash);
CREATE INDEX idx_wfile_name ON writtenFile(name);

CREATE TABLE readFile (
    id INTEGER PRIMARY KEY,
    cmdId INTEGER NOT NULL REFERENCES cmd(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    bytes BLOB
);

CREATE INDEX idx_rfile_cmd ON readFile(cmdId);
CREATE INDEX idx_rfile_name ON readFile(name);

CREATE TABLE version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    ver TEXT NOT NULL
);
"#;

/// Qualified column names for query predicates.
pub mod cols {
    pub const CMD_ID: &str = "cmd.id";
    pub const CMD_TXT: &str = "cmd.txt";
    pub const CMD_WORKING_DIR: &str = "cmd.workingDirectory";
    pub const CMD_START_TIME: &str = "cmd.startTime";
    pub const CMD_END_TIME: &str = "cmd.endTime";

    pub const ENV_HOSTNAME: &str = "env.hostname";
    pub const ENV_USERNAME: &str = "env.username";

    pub const SESSION_ID: &str = "session.id";

    pub const WFILE_NAME: &str = "writtenFile.name";
    pub const WFILE_PATH: &str = "writtenFile.path";
    pub const WFILE_SIZE: &str = "writtenFile.size";
    pub const WFILE_MTIME: &str = "writtenFile.mtime";
    pub const WFILE_HASH: &str = "writtenFile.hash";

    pub const RFILE_NAME: &str = "readFile.name";
    pub const RFILE_PATH: &str = "readFile.path";
    pub const RFILE_SIZE: &str = "readFile.size";
    pub const RFILE_MTIME: &str = "readFile.mtime";
}
