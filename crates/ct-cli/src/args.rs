//! Command-line surface of the query CLI.
//!
//! Predicate options take an optional comparison operator before the value,
//! in shell-friendly syntax: `--wsize -gt 10KiB` means "written file size
//! greater than 10 KiB". Without an operator, `-eq` is implied.
//!
//! Operator tokens start with a hyphen, which argument parsers read as
//! flags; [`fuse_operator_mnemonics`] therefore joins each mnemonic with
//! the following value into a single NUL-separated token before parsing.
//! NUL cannot occur in shell arguments, so the separator is unambiguous.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::ffi::OsString;
use std::path::PathBuf;

const QUERY_LONG_ABOUT: &str = "\
Query the command/file store for several parameters which are AND-connected.
For several fields optional comparison-operators are supported; they are
passed in shell-friendly syntax, e.g. -gt stands for 'greater than'.
-like allows sql wildcards (e.g. '%').

Examples:
  cmdtrail query --wfile /tmp/foo123
      use an existing file to find out how it was created.
  cmdtrail query --wsize -gt 10KiB
      print all commands which have written files greater than 10 KiB.
  cmdtrail query --wpath -like '/home/user%'
      print all commands which have written below /home/user.";

/// Separator between a fused operator mnemonic and its value.
pub const OPERATOR_SEP: char = '\0';

const MNEMONICS: [&str; 7] = ["-eq", "-ne", "-lt", "-le", "-gt", "-ge", "-like"];

/// Join operator mnemonics with their following value so the parser sees
/// one token per predicate: `--wsize -gt 10KiB` becomes
/// `--wsize -gt\010KiB`.
pub fn fuse_operator_mnemonics(raw: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    let mut out: Vec<OsString> = Vec::new();
    let mut iter = raw.into_iter();
    while let Some(token) = iter.next() {
        let is_mnemonic = token
            .to_str()
            .map(|s| MNEMONICS.contains(&s))
            .unwrap_or(false);
        let after_long_flag = out
            .last()
            .and_then(|prev| prev.to_str())
            .map(|s| s.starts_with("--") && s.len() > 2)
            .unwrap_or(false);
        if is_mnemonic && after_long_flag {
            if let Some(value) = iter.next() {
                let mut fused = token;
                fused.push(OPERATOR_SEP.to_string());
                fused.push(&value);
                out.push(fused);
                continue;
            }
        }
        out.push(token);
    }
    out
}

#[derive(Parser)]
#[command(name = "cmdtrail", version, about = "Query recorded commands and their file events")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Override the data directory (store and archived file bodies)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Query the store with AND-connected predicates
    #[command(long_about = QUERY_LONG_ABOUT)]
    Query(QueryArgs),
}

#[derive(Args)]
pub struct QueryArgs {
    /// Display the last N commands
    #[arg(long, value_name = "N")]
    pub history: Option<u32>,

    /// Derive predicates from an existing file to find the command which
    /// created or modified it
    #[arg(long, value_name = "PATH")]
    pub wfile: Option<PathBuf>,

    /// Which properties to take from the file passed via --wfile
    #[arg(long, value_delimiter = ',', requires = "wfile", value_name = "PROPS")]
    pub take_from_wfile: Option<Vec<WfileProp>>,

    /// Written files by filename
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub wname: Option<String>,

    /// Written files by (full) directory path
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub wpath: Option<String>,

    /// Written files by size (byte units allowed, e.g. 10KiB)
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub wsize: Option<String>,

    /// Written files by content hash
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub whash: Option<String>,

    /// Written files by mtime
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub wmtime: Option<String>,

    /// Read files by filename
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub rname: Option<String>,

    /// Read files by (full) directory path
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub rpath: Option<String>,

    /// Read files by size (byte units allowed)
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub rsize: Option<String>,

    /// Read files by mtime
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub rmtime: Option<String>,

    /// Commands with matching command text
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub command_text: Option<String>,

    /// Commands with matching working directory
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub command_working_dir: Option<String>,

    /// Commands with matching ids (ids are not necessarily ascending)
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub command_id: Option<String>,

    /// Commands by the date (time) they finished
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub command_end_date: Option<String>,

    /// Commands of a given shell session
    #[arg(long, allow_hyphen_values = true, value_name = "[OP] VALUE")]
    pub shell_session_id: Option<String>,

    /// Display at most the first N lines of each read file
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub max_rfile_lines: usize,

    /// Restore read files of the found commands at the system's temporary
    /// directory
    #[arg(long)]
    pub restore_rfiles: bool,

    /// Restore read files of the found commands at the given path
    #[arg(long, value_name = "PATH", conflicts_with = "restore_rfiles")]
    pub restore_rfiles_at: Option<PathBuf>,

    /// Restore the read file with the given id at the working directory
    #[arg(long, value_name = "ID")]
    pub restore_rfile_id: Option<i64>,

    /// Output format
    #[arg(long, short = 'f', value_enum, default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WfileProp {
    Mtime,
    Hash,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}
