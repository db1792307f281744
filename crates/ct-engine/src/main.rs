//! cmdtrail-run: the privileged observation engine.
//!
//! Installed setuid root. Either observes a single command (`-- COMMAND
//! ARGS...`), attaches to an interactive shell via an inherited control
//! socket (`--socket-fd`), or joins a previously created mount namespace
//! (`--msenter`).

use clap::Parser;
use ct_common::error::format_error_human;
use ct_common::{Error, Result, SessionUuid, Settings};
use ct_engine::{namespace, watcher};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cmdtrail-run", version, about = "Observe a command's file activity")]
struct Cli {
    /// Inherited unix-stream socket descriptor (shell observation mode)
    #[arg(long, value_name = "FD", conflicts_with_all = ["msenter", "command"])]
    socket_fd: Option<i32>,

    /// UUID of the observed shell session
    #[arg(long, value_name = "UUID")]
    shell_session_uuid: Option<String>,

    /// Join the mount namespace of the given rendezvous process and execute
    /// the remaining arguments there
    #[arg(long, value_name = "PID")]
    msenter: Option<i32>,

    /// Override the data directory (store and archived file bodies)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// The command to observe (or to execute for --msenter)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<OsString>,
}

fn main() {
    let cli = Cli::parse();
    ct_common::logging::init(cli.verbose, cli.quiet);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", format_error_human(&e));
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let settings = Settings::load()?;

    if let Some(pid) = cli.msenter {
        namespace::join_and_exec(pid, &settings.msenter_group, &cli.command)?;
        // join_and_exec only returns on error.
        return Ok(0);
    }

    let session_uuid = match &cli.shell_session_uuid {
        Some(raw) => Some(SessionUuid::parse(raw).ok_or_else(|| {
            Error::Config(format!("invalid shell session uuid: {raw}"))
        })?),
        None => None,
    };

    watcher::run(
        watcher::WatchOpts {
            socket_fd: cli.socket_fd,
            command: cli.command,
            session_uuid,
            data_dir: cli.data_dir,
        },
        settings,
    )
}
