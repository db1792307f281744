//! Mount-point resolution from /proc/self/mountinfo.
//!
//! Fanotify marks are per-mount, so each watch root is resolved to its
//! enclosing mount point; subtree filtering below the mount happens in the
//! event cache.

use ct_common::{Error, Result};
use std::path::{Path, PathBuf};

/// All mount points of the current namespace, as listed in mountinfo.
pub fn mount_points() -> Result<Vec<PathBuf>> {
    let content =
        std::fs::read_to_string("/proc/self/mountinfo").map_err(|e| Error::Io {
            path: PathBuf::from("/proc/self/mountinfo"),
            source: e,
        })?;
    Ok(parse_mountinfo(&content))
}

/// The mount point is the fifth whitespace-separated field; special
/// characters are octal-escaped (`\040` for space).
fn parse_mountinfo(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(|raw| PathBuf::from(unescape_octal(raw)))
        .collect()
}

fn unescape_octal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let digits: String = chars.clone().take(3).collect();
        if digits.len() == 3 && digits.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            if let Ok(code) = u8::from_str_radix(&digits, 8) {
                out.push(code as char);
                chars.nth(2);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// The longest mount point that is an ancestor of `path` (or `path`
/// itself). `/` is always a mount, so watch roots under a mounted
/// filesystem resolve to something.
pub fn mount_point_of<'a>(path: &Path, mounts: &'a [PathBuf]) -> Option<&'a PathBuf> {
    mounts
        .iter()
        .filter(|m| path.ancestors().any(|a| a == m.as_path()))
        .max_by_key(|m| m.as_os_str().len())
}
