//! The cmdtrail observation engine.
//!
//! `cmdtrail-run` is installed setuid root. It unshares its mount namespace,
//! installs fanotify marks on the mounts of the configured watch roots,
//! spawns (or attaches to) the observed workload, and multiplexes the kernel
//! notification channel against a control socket. Raw events are
//! deduplicated and classified into per-command read and write sets, which
//! are flushed to the store together with the command record.
//!
//! Privileges are held per phase: namespace and mark setup run with
//! effective root, the event drain runs as the calling user (plus
//! CAP_SYS_PTRACE to resolve fd links), persistence runs with no
//! capabilities at all.

pub mod events;
pub mod fanotify;
pub mod mounts;
pub mod namespace;
pub mod privilege;
pub mod protocol;
pub mod shell_log;
pub mod subprocess;
pub mod watcher;

pub use watcher::{run, WatchOpts};
