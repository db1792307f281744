//! Materialize stored read-file bodies back to disk.

use ct_common::{Error, Result};
use ct_store::{Store, StoredCommand, StoredReadFile};
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

const RESTORE_DIR_NAME: &str = "cmdtrail-restore";

/// Restore one read file by id into the current working directory. An
/// existing file is only replaced after confirmation on a terminal.
pub fn single_read_file(store: &Store, rfile_id: i64) -> Result<()> {
    let rfile = store
        .read_file_by_id(rfile_id)
        .map_err(ct_common::Error::from)?
        .ok_or_else(|| {
            Error::Config(format!(
                "cannot restore file - no store entry with id {rfile_id}"
            ))
        })?;

    let target = PathBuf::from(&rfile.event.name);
    if target.exists() && std::io::stdin().is_terminal() && !confirm_replace(&rfile.event.name)? {
        return Ok(());
    }
    write_body(&rfile, &target)?;
    println!(
        "File '{}' restored at the current working directory.",
        rfile.event.name
    );
    Ok(())
}

/// Restore the read files of all found commands below `base` (the system
/// temporary directory when none is given), one subdirectory per command.
pub fn read_files_of(results: &[StoredCommand], base: Option<&Path>) -> Result<()> {
    let base = match base {
        Some(dir) => {
            if !dir.exists() {
                return Err(Error::Config(format!(
                    "restore directory {} does not exist",
                    dir.display()
                )));
            }
            dir.join(RESTORE_DIR_NAME)
        }
        None => std::env::temp_dir().join(RESTORE_DIR_NAME),
    };

    let mut restored = 0usize;
    for command in results {
        if command.reads.iter().all(|r| r.event.bytes.is_none()) {
            continue;
        }
        let cmd_dir = base.join(format!("cmd-{}", command.info.id.unwrap_or_default()));
        std::fs::create_dir_all(&cmd_dir).map_err(|e| Error::Io {
            path: cmd_dir.clone(),
            source: e,
        })?;
        for rfile in &command.reads {
            if rfile.event.bytes.is_none() {
                tracing::debug!(
                    "read file {} has no stored body, skipping",
                    rfile.event.name
                );
                continue;
            }
            write_body(rfile, &cmd_dir.join(&rfile.event.name))?;
            restored += 1;
        }
    }
    println!("Restored {restored} read file(s) below {}.", base.display());
    Ok(())
}

fn write_body(rfile: &StoredReadFile, target: &Path) -> Result<()> {
    let bytes = rfile.event.bytes.as_deref().ok_or_else(|| {
        Error::Config(format!(
            "read file {} was recorded without its content \
             (store_bytes disabled or file too large)",
            rfile.event.name
        ))
    })?;
    std::fs::write(target, bytes).map_err(|e| Error::Io {
        path: target.to_path_buf(),
        source: e,
    })
}

fn confirm_replace(name: &str) -> Result<bool> {
    print!("File {name} exists. Replace? [y/N] ");
    std::io::stdout().flush().map_err(|e| Error::Io {
        path: PathBuf::from("<stdout>"),
        source: e,
    })?;
    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|e| Error::Io {
            path: PathBuf::from("<stdin>"),
            source: e,
        })?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
