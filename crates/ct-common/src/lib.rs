//! cmdtrail common types, IDs, and errors.
//!
//! This crate provides the foundations shared by the observation engine,
//! the store, and the query CLI:
//! - The project-wide error taxonomy
//! - Session and content-hash identity types
//! - Include/exclude path trees with subtree semantics
//! - Watch configuration loading and validation
//! - The per-command record types exchanged between engine and store
//! - Logging initialization

pub mod bytesize;
pub mod command;
pub mod config;
pub mod error;
pub mod ids;
pub mod logging;
pub mod pathtree;

pub use command::{CommandInfo, FileReadEvent, FileWriteEvent, INVALID_RETURN_VAL};
pub use config::{ReadEventSettings, Settings, WriteEventSettings};
pub use error::{Error, Result};
pub use ids::{HashValue, SessionUuid};
pub use pathtree::PathTree;
