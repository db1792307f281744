//! Session and content-hash identity types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies one interactive shell session.
///
/// The shell integration generates the UUID once per shell invocation and
/// passes it to every engine run it spawns; all commands of the session share
/// it. Single-command mode carries no session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionUuid(pub Uuid);

impl SessionUuid {
    pub fn generate() -> Self {
        SessionUuid(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(SessionUuid)
    }
}

impl fmt::Display for SessionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 64-bit content fingerprint (xxh3).
///
/// Lossy by design: the query layer tolerates collisions by combining the
/// hash with size and mtime predicates. Stored in SQLite as an i64 via a
/// two's-complement bit cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashValue(pub u64);

impl HashValue {
    /// Bit-cast for SQLite storage (INTEGER columns are signed).
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(v: i64) -> Self {
        HashValue(v as u64)
    }

    /// Parse a user-supplied hash value, decimal or 0x-prefixed hex.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16).ok().map(HashValue)
        } else {
            s.parse::<u64>().ok().map(HashValue)
        }
    }

    /// Streaming content fingerprint of a file.
    pub fn of_file(path: &std::path::Path) -> std::io::Result<Self> {
        use std::io::Read;
        let mut file = std::fs::File::open(path)?;
        let mut hasher = xxhash_rust::xxh3::Xxh3::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(HashValue(hasher.digest()))
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
