//! Error types for cmdtrail.
//!
//! One taxonomy for the whole project. Setup errors (privilege, namespace,
//! mark, store-open, missing group) are fatal and carry a remediation hint
//! that names the exact fix; steady-state errors are logged and skipped by
//! their call sites.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cmdtrail operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for cmdtrail.
#[derive(Error, Debug)]
pub enum Error {
    #[error("privilege error: {0}")]
    Privilege(String),

    #[error("mount namespace error: {0}")]
    Namespace(String),

    #[error("failed to install file mark on {path}: {msg}")]
    Mark { path: PathBuf, msg: String },

    #[error("event reader error: {0}")]
    Reader(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("control protocol error: {0}")]
    Protocol(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Short headline for human-readable stderr output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Privilege(_) => "Privilege Error",
            Error::Namespace(_) => "Mount Namespace Error",
            Error::Mark { .. } => "File Mark Error",
            Error::Reader(_) => "Event Reader Error",
            Error::Store(_) => "Store Error",
            Error::Protocol(_) => "Control Protocol Error",
            Error::Io { .. } => "I/O Error",
            Error::Config(_) => "Configuration Error",
        }
    }

    /// A remediation hint naming the fix, where one is known.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Error::Privilege(_) => Some(
                "The engine binary must be owned by root with the setuid bit set. \
                 As root execute: chown root cmdtrail-run && chmod u+s cmdtrail-run",
            ),
            Error::Namespace(_) => Some(
                "Unsharing the mount namespace requires CAP_SYS_ADMIN. \
                 Check the setuid bit on cmdtrail-run and that your kernel \
                 supports mount namespaces.",
            ),
            Error::Mark { .. } => Some(
                "Installing fanotify marks requires CAP_SYS_ADMIN and a \
                 supported filesystem. Network or FUSE mounts may refuse marks; \
                 exclude them from the watched paths.",
            ),
            Error::Store(_) => Some(
                "Check free disk space and permissions on the data directory \
                 (CMDTRAIL_DATA or $XDG_DATA_HOME/cmdtrail).",
            ),
            Error::Config(_) => Some(
                "Check the syntax of config.json in the config directory \
                 (CMDTRAIL_CONFIG_DIR or $XDG_CONFIG_HOME/cmdtrail).",
            ),
            _ => None,
        }
    }
}

/// Format an error for human-readable stderr output.
pub fn format_error_human(err: &Error) -> String {
    match err.remediation() {
        Some(fix) => format!("{}\n  Reason: {}\n  Fix: {}", err.headline(), err, fix),
        None => format!("{}\n  Reason: {}", err.headline(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_error_names_the_fix() {
        let err = Error::Privilege("effective uid is not 0".into());
        let text = format_error_human(&err);
        assert!(text.contains("chmod u+s"));
        assert!(text.contains("effective uid is not 0"));
    }

    #[test]
    fn errors_without_known_remedy_print_reason_only() {
        let err = Error::Reader("stale fd".into());
        let text = format_error_human(&err);
        assert!(text.contains("stale fd"));
        assert!(!text.contains("Fix:"));
    }
}
