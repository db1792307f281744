//! SQLite store for cmdtrail.
//!
//! One database per user at `$DATA/database.db`, plus a content-addressed
//! archive of written-file bodies under `$DATA/stored_files/`. The store
//! opens lazily, migrates forward-only on open, and persists command rows
//! together with their deduplicated read/write event sets.
//!
//! Timestamps are stored as i64 epoch milliseconds, mtimes as epoch
//! seconds, and content hashes as i64 bit-casts of the 64-bit fingerprint.

pub mod connection;
pub mod error;
pub mod migrate;
pub mod query;
pub mod records;
pub mod recorder;
pub mod schema;
pub mod stored_files;

pub use connection::Store;
pub use error::StoreError;
pub use query::{CmpOp, CommandQuery, StoredCommand, StoredReadFile, StoredWrittenFile};
pub use recorder::Recorder;
pub use stored_files::StoredFiles;
