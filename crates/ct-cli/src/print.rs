//! Rendering of query results.
//!
//! Human output goes to stdout in a compact block per command; JSON output
//! is an array of command objects. Read-file previews show at most the
//! configured number of lines.

use crate::args::{OutputFormat, QueryArgs};
use crate::restore;
use chrono::{DateTime, Local, Utc};
use ct_common::bytesize::format_bytes;
use ct_common::Result;
use ct_common::INVALID_RETURN_VAL;
use ct_store::StoredCommand;
use serde::Serialize;

pub fn output(results: &[StoredCommand], args: &QueryArgs) -> Result<()> {
    match args.format {
        OutputFormat::Human => print_human(results, args.max_rfile_lines),
        OutputFormat::Json => print_json(results, args.max_rfile_lines)?,
    }

    if args.restore_rfiles || args.restore_rfiles_at.is_some() {
        restore::read_files_of(results, args.restore_rfiles_at.as_deref())?;
    }
    Ok(())
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn print_human(results: &[StoredCommand], max_rfile_lines: usize) {
    if results.is_empty() {
        println!("No commands found.");
        return;
    }
    for command in results {
        let info = &command.info;
        let id = info.id.unwrap_or(-1);
        let return_val = if info.return_val == INVALID_RETURN_VAL {
            "unknown".to_string()
        } else {
            info.return_val.to_string()
        };
        println!("cmd-id {id}: $ {}", info.text);
        println!(
            "  returned {return_val} at {}, cwd {} ({}@{})",
            info.end_time.map(|t| format_time(&t)).unwrap_or_default(),
            info.working_dir.display(),
            info.username,
            info.hostname,
        );
        if let Some(session) = &info.session_uuid {
            println!("  session {session}");
        }
        if !command.writes.is_empty() {
            println!("  written files:");
            for write in &command.writes {
                let hash = write
                    .event
                    .hash
                    .map(|h| format!(", hash {h}"))
                    .unwrap_or_default();
                println!(
                    "    {} ({}{hash})",
                    write.event.path.join(&write.event.name).display(),
                    format_bytes(write.event.size),
                );
            }
        }
        if !command.reads.is_empty() {
            println!("  read files:");
            for read in &command.reads {
                println!(
                    "    id {}: {} ({})",
                    read.id,
                    read.event.path.join(&read.event.name).display(),
                    format_bytes(read.event.size),
                );
                for line in preview_lines(read.event.bytes.as_deref(), max_rfile_lines) {
                    println!("      | {line}");
                }
            }
        }
        println!();
    }
}

#[derive(Serialize)]
struct CommandView<'a> {
    id: Option<i64>,
    text: &'a str,
    working_dir: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    return_val: Option<i32>,
    session_uuid: Option<String>,
    hostname: &'a str,
    username: &'a str,
    written_files: Vec<WrittenView<'a>>,
    read_files: Vec<ReadView<'a>>,
}

#[derive(Serialize)]
struct WrittenView<'a> {
    id: i64,
    name: &'a str,
    path: String,
    size: u64,
    mtime: i64,
    hash: Option<String>,
}

#[derive(Serialize)]
struct ReadView<'a> {
    id: i64,
    name: &'a str,
    path: String,
    size: u64,
    mtime: i64,
    preview: Option<Vec<String>>,
}

fn print_json(results: &[StoredCommand], max_rfile_lines: usize) -> Result<()> {
    let views: Vec<CommandView> = results
        .iter()
        .map(|command| {
            let info = &command.info;
            CommandView {
                id: info.id,
                text: &info.text,
                working_dir: info.working_dir.display().to_string(),
                start_time: info.start_time,
                end_time: info.end_time,
                return_val: (info.return_val != INVALID_RETURN_VAL).then_some(info.return_val),
                session_uuid: info.session_uuid.map(|s| s.to_string()),
                hostname: &info.hostname,
                username: &info.username,
                written_files: command
                    .writes
                    .iter()
                    .map(|w| WrittenView {
                        id: w.id,
                        name: &w.event.name,
                        path: w.event.path.display().to_string(),
                        size: w.event.size,
                        mtime: w.event.mtime,
                        hash: w.event.hash.map(|h| h.to_string()),
                    })
                    .collect(),
                read_files: command
                    .reads
                    .iter()
                    .map(|r| ReadView {
                        id: r.id,
                        name: &r.event.name,
                        path: r.event.path.display().to_string(),
                        size: r.event.size,
                        mtime: r.event.mtime,
                        preview: r
                            .event
                            .bytes
                            .as_deref()
                            .map(|b| preview_lines(Some(b), max_rfile_lines)),
                    })
                    .collect(),
            }
        })
        .collect();

    let payload = serde_json::to_string_pretty(&views)
        .map_err(|e| ct_common::Error::Config(format!("serializing results failed: {e}")))?;
    println!("{payload}");
    Ok(())
}

fn preview_lines(bytes: Option<&[u8]>, max_lines: usize) -> Vec<String> {
    let Some(bytes) = bytes else {
        return Vec::new();
    };
    String::from_utf8_lossy(bytes)
        .lines()
        .take(max_lines)
        .map(|l| l.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_respects_line_cap() {
        let bytes = b"one\ntwo\nthree\nfour\n";
        assert_eq!(preview_lines(Some(bytes), 2), vec!["one", "two"]);
        assert_eq!(preview_lines(Some(bytes), 10).len(), 4);
        assert!(preview_lines(None, 5).is_empty());
    }
}
