//! Store error type.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to open store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unparsable schema version {0:?}")]
    VersionParse(String),

    #[error("{0}")]
    DataDir(String),
}

impl From<StoreError> for ct_common::Error {
    fn from(err: StoreError) -> Self {
        ct_common::Error::Store(err.to_string())
    }
}
