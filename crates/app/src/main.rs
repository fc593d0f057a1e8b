mod cli;
mod report;
mod watch;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    match Cli::parse().command {
        Command::Serve(args) => relay::serve(args.try_into()?),
        Command::Watch(args) => watch::run(args.try_into()?),
        Command::Report(args) => report::run(args.try_into()?),
    }
}
