//! Command-line configuration.

use std::time::Duration;

use clap::Parser;
use pglisten::DEFAULT_RETRY_INTERVAL;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Resolved CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Channels to subscribe to.
    pub channels: Vec<String>,

    /// Delay before reconnecting after a failure.
    pub retry_interval: Duration,

    /// Time allowed for establishing a connection.
    pub connect_timeout: Duration,

    /// Print JSON lines instead of plain text.
    pub json: bool,
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "pglisten")]
#[command(version, about = "Print PostgreSQL notifications as they arrive", long_about = None)]
pub struct Args {
    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Seconds to wait before reconnecting after a failure.
    #[arg(long, default_value_t = DEFAULT_RETRY_INTERVAL.as_secs())]
    pub retry_interval: u64,

    /// Connect timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// Print one JSON object per notification.
    #[arg(long)]
    pub json: bool,

    /// Channels to listen on.
    #[arg(required = true)]
    pub channels: Vec<String>,
}

impl Args {
    /// Convert command-line arguments to the CLI configuration.
    pub fn into_config(self) -> CliConfig {
        let mut channels = self.channels;
        channels.sort();
        channels.dedup();

        CliConfig {
            database_url: self.database_url,
            channels,
            retry_interval: Duration::from_secs(self.retry_interval),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            json: self.json,
        }
    }
}
