//! Human byte-size parsing and formatting (`10KiB`, `2MB`, plain bytes).
//!
//! Used by the watch configuration and the `wsize`/`rsize` query arguments.

/// Parse a byte size with an optional unit suffix.
///
/// Binary units (KiB, MiB, GiB, TiB) and decimal units (KB, MB, GB, TB) are
/// accepted case-insensitively; a bare number means bytes.
pub fn parse_bytes(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num.trim().parse().ok()?;
    if value < 0.0 {
        return None;
    }
    let factor: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        "tib" => 1 << 40,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "tb" => 1_000_000_000_000,
        _ => return None,
    };
    Some((value * factor as f64) as u64)
}

/// Format a byte count with the largest fitting binary unit.
pub fn format_bytes(n: u64) -> String {
    const UNITS: [(&str, u64); 4] = [
        ("TiB", 1 << 40),
        ("GiB", 1 << 30),
        ("MiB", 1 << 20),
        ("KiB", 1 << 10),
    ];
    for (unit, factor) in UNITS {
        if n >= factor {
            return format!("{:.1} {}", n as f64 / factor as f64, unit);
        }
    }
    format!("{} B", n)
}
