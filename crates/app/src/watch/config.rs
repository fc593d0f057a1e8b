use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;
use viz::{
    DEFAULT_TRAJECTORY_LIMIT, ViewState,
    projection::{DEFAULT_CENTER, DEFAULT_SCALE},
};

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:3000/ws";

#[derive(Clone, Debug)]
pub struct WatchConfig {
    pub server_url: String,
    pub follow: Option<String>,
    /// CSS pixels.
    pub width: f64,
    pub height: f64,
    pub dpr: f64,
    /// Pixels per degree.
    pub scale: f64,
    pub trajectory_limit: usize,
    pub output: PathBuf,
}

impl WatchConfig {
    pub fn initial_view(&self) -> ViewState {
        let mut view = ViewState::new(DEFAULT_CENTER, self.scale, self.width, self.height);
        view.followed = self.follow.clone();
        view
    }
}

/// CLI arguments accepted by the `watch` subcommand.
#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Relay WebSocket URL.
    #[arg(long, value_name = "URL", default_value = DEFAULT_SERVER_URL)]
    pub server: String,
    /// Connection id to keep centred.
    #[arg(long, value_name = "ID")]
    pub follow: Option<String>,
    /// Canvas width in CSS pixels.
    #[arg(long, default_value_t = 800.0)]
    pub width: f64,
    /// Canvas height in CSS pixels.
    #[arg(long, default_value_t = 600.0)]
    pub height: f64,
    /// Device pixel ratio of the output image.
    #[arg(long, default_value_t = 1.0)]
    pub dpr: f64,
    /// Map scale in pixels per degree.
    #[arg(long, default_value_t = DEFAULT_SCALE)]
    pub scale: f64,
    /// Points kept per trajectory.
    #[arg(long = "trajectory-limit", value_name = "N", default_value_t = DEFAULT_TRAJECTORY_LIMIT)]
    pub trajectory_limit: usize,
    /// PNG written after every snapshot.
    #[arg(long = "out", value_name = "PATH", default_value = "tracklive.png")]
    pub output: PathBuf,
}

impl TryFrom<WatchArgs> for WatchConfig {
    type Error = anyhow::Error;

    fn try_from(args: WatchArgs) -> Result<Self> {
        if !(args.server.starts_with("ws://") || args.server.starts_with("wss://")) {
            bail!("--server must be a ws:// or wss:// URL");
        }
        let positive = |value: f64| value.is_finite() && value > 0.0;
        if !(positive(args.width) && positive(args.height)) {
            bail!("--width and --height must be positive");
        }
        if !positive(args.dpr) {
            bail!("--dpr must be positive");
        }
        if !positive(args.scale) {
            bail!("--scale must be positive");
        }
        if args.trajectory_limit == 0 {
            bail!("--trajectory-limit must be at least 1");
        }
        let follow = args
            .follow
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Ok(Self {
            server_url: args.server,
            follow,
            width: args.width,
            height: args.height,
            dpr: args.dpr,
            scale: args.scale,
            trajectory_limit: args.trajectory_limit,
            output: args.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use viz::GeoPoint;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        watch: WatchArgs,
    }

    fn parse(args: &[&str]) -> Result<WatchConfig> {
        let harness = Harness::try_parse_from(std::iter::once("watch").chain(args.iter().copied()))?;
        WatchConfig::try_from(harness.watch)
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!((config.width, config.height, config.dpr), (800.0, 600.0, 1.0));
        assert_eq!(config.trajectory_limit, 200);
        assert_eq!(config.output, PathBuf::from("tracklive.png"));
        assert!(config.follow.is_none());

        let view = config.initial_view();
        assert_eq!(view.center, GeoPoint::new(40.7128, -74.0060));
        assert_eq!(view.scale, 100_000.0);
    }

    #[test]
    fn follow_is_carried_into_the_view() {
        let config = parse(&["--follow", " abc "]).unwrap();
        assert_eq!(config.follow.as_deref(), Some("abc"));
        assert_eq!(config.initial_view().followed.as_deref(), Some("abc"));
        assert!(parse(&["--follow", "  "]).unwrap().follow.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(&["--server", "http://localhost:3000"]).is_err());
        assert!(parse(&["--width", "0"]).is_err());
        assert!(parse(&["--dpr", "-1"]).is_err());
        assert!(parse(&["--scale", "0"]).is_err());
        assert!(parse(&["--trajectory-limit", "0"]).is_err());
    }
}
