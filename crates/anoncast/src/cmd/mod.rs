use std::path::PathBuf;
use std::time::Duration;

use anoncast_client::{keystore_path, ClientConfig};
use anoncast_keystore::{ChannelId, KeyStore};
use anoncast_transport::Endpoint;
use clap::{Args, Subcommand};

use crate::exit::{keystore_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod channel;
pub mod listen;
pub mod relay;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create, list, share and remove channels.
    #[command(subcommand)]
    Channel(ChannelCommand),
    /// Send one message on a channel through a relay.
    Send(SendArgs),
    /// Connect to a relay and print messages for our channels.
    Listen(ListenArgs),
    /// Run a broadcast relay.
    Relay(RelayArgs),
    /// Show version information.
    Version(VersionArgs),
}

#[derive(Subcommand, Debug)]
pub enum ChannelCommand {
    /// Create a channel with fresh key material.
    New(NewChannelArgs),
    /// List channels and key usage.
    List,
    /// Remove a channel and erase its key material.
    Remove(ChannelArgs),
    /// Write the peer's half of a channel as a bundle directory.
    Export(ExportArgs),
    /// Import a channel from a bundle directory.
    Import(ImportArgs),
}

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub data_dir: PathBuf,
    pub buffer_size: u64,
    pub max_package_size: usize,
    pub format: OutputFormat,
}

impl Context {
    pub fn open_store(&self) -> CliResult<KeyStore> {
        KeyStore::load(keystore_path(&self.data_dir), self.buffer_size)
            .map_err(|err| keystore_error("failed to open key store", err))
    }

    pub fn client_config(&self, address: Endpoint) -> ClientConfig {
        ClientConfig {
            key_buffer_size: self.buffer_size,
            max_package_size: self.max_package_size,
            ..ClientConfig::new(&self.data_dir, address)
        }
    }
}

pub fn run(command: Command, ctx: &Context) -> CliResult<i32> {
    match command {
        Command::Channel(command) => channel::run(command, ctx),
        Command::Send(args) => send::run(args, ctx),
        Command::Listen(args) => listen::run(args, ctx),
        Command::Relay(args) => relay::run(args, ctx),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct NewChannelArgs {
    /// Also export the peer's bundle into this directory.
    #[arg(long, value_name = "DIR")]
    pub bundle: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ChannelArgs {
    /// Channel id.
    pub channel: ChannelId,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Channel id.
    pub channel: ChannelId,
    /// Bundle directory to create.
    pub dest: PathBuf,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Bundle directory written by `channel export`.
    pub bundle: PathBuf,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Relay address (`host:port`, `tcp://host:port` or `unix:/path`).
    pub address: Endpoint,
    /// Channel to send on.
    #[arg(long, short = 'c')]
    pub channel: ChannelId,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Relay address (`host:port`, `tcp://host:port` or `unix:/path`).
    pub address: Endpoint,
    /// Only print messages on these channels (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub channels: Option<Vec<ChannelId>>,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Exit with a timeout error when idle this long (e.g. 30s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Drop the connection when a frame declares an invalid length.
    #[arg(long)]
    pub drop_on_broken_length: bool,
}

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Address to bind (`host:port`, `tcp://host:port` or `unix:/path`).
    pub address: Endpoint,
    /// Drop peers that cannot take a frame within this long.
    #[arg(long, default_value = "5s")]
    pub write_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else {
        (input.strip_suffix('s').unwrap_or(input), false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }
}
