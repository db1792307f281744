//! cmdtrail: query the command/file store.

mod args;
mod print;
mod query;
mod restore;

use args::{Cli, Command};
use clap::Parser;
use ct_common::error::format_error_human;

fn main() {
    let argv = args::fuse_operator_mnemonics(std::env::args_os());
    let cli = Cli::parse_from(argv);
    ct_common::logging::init(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Command::Query(query_args) => query::run(&cli, query_args),
    };
    if let Err(e) = result {
        eprintln!("{}", format_error_human(&e));
        std::process::exit(1);
    }
}
