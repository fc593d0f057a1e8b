use clap::{Parser, Subcommand};
use relay::ServeArgs;

use crate::{report::ReportArgs, watch::WatchArgs};

/// Live position relay and trajectory viewer.
#[derive(Debug, Parser)]
#[command(name = "tracklive", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the relay server.
    Serve(ServeArgs),
    /// Follow the relay and render trajectories to a PNG.
    Watch(WatchArgs),
    /// Report one position and stay connected until Ctrl-C.
    Report(ReportArgs),
}
