//! Translate parsed arguments into a store query and dispatch the result.

use crate::args::{Cli, QueryArgs, WfileProp};
use crate::{print, restore};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use ct_common::bytesize::parse_bytes;
use ct_common::{Error, HashValue, Result};
use ct_store::schema::cols;
use ct_store::{CmpOp, CommandQuery, Store};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

const TEXT_OPS: &[CmpOp] = &[
    CmpOp::Eq,
    CmpOp::Ne,
    CmpOp::Lt,
    CmpOp::Le,
    CmpOp::Gt,
    CmpOp::Ge,
    CmpOp::Like,
];
const ORDERED_OPS: &[CmpOp] = &[
    CmpOp::Eq,
    CmpOp::Ne,
    CmpOp::Lt,
    CmpOp::Le,
    CmpOp::Gt,
    CmpOp::Ge,
];
const EQ_OPS: &[CmpOp] = &[CmpOp::Eq, CmpOp::Ne];

pub fn run(cli: &Cli, args: &QueryArgs) -> Result<()> {
    let store = match &cli.data_dir {
        Some(dir) => Store::open(dir),
        None => Store::open_default(),
    }
    .map_err(ct_common::Error::from)?;

    if let Some(rfile_id) = args.restore_rfile_id {
        return restore::single_read_file(&store, rfile_id);
    }

    let mut query = CommandQuery::new();

    if let Some(n) = args.history {
        query.set_match_all();
        query.set_ascending(false);
        query.set_limit(n);
        let mut results = query.run(&store).map_err(ct_common::Error::from)?;
        // Most recent last, like a shell history.
        results.reverse();
        return print::output(&results, args);
    }

    add_text_pred(&mut query, cols::WFILE_NAME, &args.wname, TEXT_OPS)?;
    add_text_pred(&mut query, cols::WFILE_PATH, &args.wpath, TEXT_OPS)?;
    add_size_pred(&mut query, cols::WFILE_SIZE, &args.wsize)?;
    add_hash_pred(&mut query, &args.whash)?;
    add_mtime_pred(&mut query, cols::WFILE_MTIME, &args.wmtime)?;

    add_text_pred(&mut query, cols::RFILE_NAME, &args.rname, TEXT_OPS)?;
    add_text_pred(&mut query, cols::RFILE_PATH, &args.rpath, TEXT_OPS)?;
    add_size_pred(&mut query, cols::RFILE_SIZE, &args.rsize)?;
    add_mtime_pred(&mut query, cols::RFILE_MTIME, &args.rmtime)?;

    add_text_pred(&mut query, cols::CMD_TXT, &args.command_text, TEXT_OPS)?;
    add_text_pred(
        &mut query,
        cols::CMD_WORKING_DIR,
        &args.command_working_dir,
        TEXT_OPS,
    )?;
    add_id_pred(&mut query, &args.command_id)?;
    add_end_date_pred(&mut query, &args.command_end_date)?;
    add_text_pred(&mut query, cols::SESSION_ID, &args.shell_session_id, EQ_OPS)?;

    if let Some(wfile) = &args.wfile {
        add_wfile_preds(&mut query, wfile, args.take_from_wfile.as_deref())?;
    }

    if query.is_empty() {
        return Err(Error::Config(
            "no target fields given (empty query); see cmdtrail query --help".into(),
        ));
    }

    let results = query.run(&store).map_err(ct_common::Error::from)?;
    print::output(&results, args)
}

/// Split a predicate input into operator and raw value. The operator, when
/// given, was fused with the value by [`crate::args::fuse_operator_mnemonics`].
fn split_pred<'a>(input: &'a str, allowed: &[CmpOp]) -> Result<(CmpOp, &'a str)> {
    match input.split_once(crate::args::OPERATOR_SEP) {
        None => Ok((CmpOp::Eq, input)),
        Some((op_raw, value)) => {
            let op = CmpOp::parse_mnemonic(op_raw).ok_or_else(|| {
                Error::Config(format!(
                    "unknown comparison operator {op_raw:?}; expected one of \
                     -eq -ne -lt -le -gt -ge -like"
                ))
            })?;
            if !allowed.contains(&op) {
                return Err(Error::Config(format!(
                    "operator {op_raw} is not supported for this field"
                )));
            }
            Ok((op, value))
        }
    }
}

fn add_text_pred(
    query: &mut CommandQuery,
    column: &'static str,
    input: &Option<String>,
    allowed: &[CmpOp],
) -> Result<()> {
    if let Some(input) = input {
        let (op, value) = split_pred(input, allowed)?;
        query.add_text(column, op, value.to_string());
    }
    Ok(())
}

fn add_size_pred(
    query: &mut CommandQuery,
    column: &'static str,
    input: &Option<String>,
) -> Result<()> {
    if let Some(input) = input {
        let (op, raw) = split_pred(input, ORDERED_OPS)?;
        let size = parse_bytes(raw)
            .ok_or_else(|| Error::Config(format!("unparsable byte size {raw:?}")))?;
        query.add_int(column, op, size as i64);
    }
    Ok(())
}

fn add_hash_pred(query: &mut CommandQuery, input: &Option<String>) -> Result<()> {
    if let Some(input) = input {
        let (op, raw) = split_pred(input, EQ_OPS)?;
        let hash = HashValue::parse(raw)
            .ok_or_else(|| Error::Config(format!("unparsable hash value {raw:?}")))?;
        query.add_int(cols::WFILE_HASH, op, hash.as_i64());
    }
    Ok(())
}

fn add_id_pred(query: &mut CommandQuery, input: &Option<String>) -> Result<()> {
    if let Some(input) = input {
        let (op, raw) = split_pred(input, ORDERED_OPS)?;
        let id: i64 = raw
            .parse()
            .map_err(|_| Error::Config(format!("unparsable command id {raw:?}")))?;
        query.add_int(cols::CMD_ID, op, id);
    }
    Ok(())
}

fn add_mtime_pred(
    query: &mut CommandQuery,
    column: &'static str,
    input: &Option<String>,
) -> Result<()> {
    if let Some(input) = input {
        let (op, raw) = split_pred(input, ORDERED_OPS)?;
        let time = parse_user_datetime(raw)?;
        query.add_int(column, op, time.timestamp());
    }
    Ok(())
}

fn add_end_date_pred(query: &mut CommandQuery, input: &Option<String>) -> Result<()> {
    if let Some(input) = input {
        let (op, raw) = split_pred(input, ORDERED_OPS)?;
        let time = parse_user_datetime(raw)?;
        query.add_int(cols::CMD_END_TIME, op, time.timestamp_millis());
    }
    Ok(())
}

/// Derive predicates from an existing file. Without an explicit property
/// selection: mtime and size always, the content hash when write-hashing is
/// enabled in the settings.
fn add_wfile_preds(
    query: &mut CommandQuery,
    file: &Path,
    props: Option<&[WfileProp]>,
) -> Result<()> {
    let meta = std::fs::metadata(file).map_err(|e| Error::Io {
        path: file.to_path_buf(),
        source: e,
    })?;

    let (use_mtime, use_hash, use_size) = match props {
        Some(props) => (
            props.contains(&WfileProp::Mtime),
            props.contains(&WfileProp::Hash),
            props.contains(&WfileProp::Size),
        ),
        None => {
            let settings = ct_common::Settings::load()?;
            (true, settings.write_events.hash, true)
        }
    };

    if use_mtime {
        query.add_int(cols::WFILE_MTIME, CmpOp::Eq, meta.mtime());
    }
    if use_size {
        query.add_int(cols::WFILE_SIZE, CmpOp::Eq, meta.size() as i64);
    }
    if use_hash {
        let hash = HashValue::of_file(file).map_err(|e| Error::Io {
            path: file.to_path_buf(),
            source: e,
        })?;
        query.add_int(cols::WFILE_HASH, CmpOp::Eq, hash.as_i64());
    }
    Ok(())
}

/// Accept RFC 3339, `YYYY-MM-DD HH:MM[:SS]`, or a bare date; naive inputs
/// are interpreted in the local timezone.
pub fn parse_user_datetime(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return local_to_utc(naive);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return local_to_utc(naive);
        }
    }
    Err(Error::Config(format!(
        "unparsable date {raw:?}; expected e.g. 2026-01-31, '2026-01-31 14:30' \
         or an RFC 3339 timestamp"
    )))
}

fn local_to_utc(naive: NaiveDateTime) -> Result<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| Error::Config(format!("ambiguous local time {naive}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_pred_defaults_to_eq() {
        let (op, value) = split_pred("value", TEXT_OPS).unwrap();
        assert_eq!(op, CmpOp::Eq);
        assert_eq!(value, "value");
    }

    #[test]
    fn split_pred_parses_operator() {
        let (op, value) = split_pred("-gt\010", ORDERED_OPS).unwrap();
        assert_eq!(op, CmpOp::Gt);
        assert_eq!(value, "10");
    }

    #[test]
    fn split_pred_rejects_disallowed_operator() {
        assert!(split_pred("-like\0x%", ORDERED_OPS).is_err());
        assert!(split_pred("-like\0x%", TEXT_OPS).is_ok());
    }

    #[test]
    fn datetime_rfc3339() {
        let dt = parse_user_datetime("2026-01-31T10:00:00Z").unwrap();
        assert_eq!(dt.timestamp(), 1_769_853_600);
    }

    #[test]
    fn datetime_bare_date_parses() {
        assert!(parse_user_datetime("2026-01-31").is_ok());
        assert!(parse_user_datetime("2026-01-31 14:30").is_ok());
        assert!(parse_user_datetime("not a date").is_err());
    }
}
