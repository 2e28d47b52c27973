mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use anoncast_frame::DEFAULT_MAX_PACKAGE_SIZE;
use anoncast_keystore::DEFAULT_BUFFER_SIZE;
use clap::Parser;

use crate::cmd::{Command, Context};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "anoncast", version, about = "Anonymous one-time-pad messaging")]
struct Cli {
    /// Directory holding the key store.
    #[arg(
        long,
        value_name = "DIR",
        env = "ANONCAST_DATA_DIR",
        default_value = "anoncast-data",
        global = true
    )]
    data_dir: PathBuf,

    /// Random bytes generated per key stream for new channels.
    #[arg(long, value_name = "BYTES", env = "ANONCAST_BUFFER_SIZE", default_value_t = DEFAULT_BUFFER_SIZE, global = true)]
    buffer_size: u64,

    /// Frames declaring this many bytes or more are rejected.
    #[arg(long, value_name = "BYTES", env = "ANONCAST_MAX_PACKAGE_SIZE", default_value_t = DEFAULT_MAX_PACKAGE_SIZE, global = true)]
    max_package_size: usize,

    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let ctx = Context {
        data_dir: cli.data_dir,
        buffer_size: cli.buffer_size,
        max_package_size: cli.max_package_size,
        format: cli.format.unwrap_or_else(OutputFormat::default_for_stdout),
    };

    match cmd::run(cli.command, &ctx) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::ChannelCommand;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "anoncast",
            "send",
            "127.0.0.1:7400",
            "--channel",
            "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "--data",
            "hello",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "anoncast",
            "send",
            "127.0.0.1:7400",
            "--channel",
            "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "--data",
            "hello",
            "--file",
            "/tmp/payload.bin",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn rejects_malformed_channel_id() {
        let err = Cli::try_parse_from(["anoncast", "channel", "remove", "not-a-uuid"])
            .expect_err("bad id should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn global_store_options_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "anoncast",
            "channel",
            "list",
            "--data-dir",
            "/tmp/anoncast-test",
            "--buffer-size",
            "4096",
        ])
        .expect("global args should parse");

        assert!(matches!(cli.command, Command::Channel(ChannelCommand::List)));
        assert_eq!(cli.data_dir, PathBuf::from("/tmp/anoncast-test"));
        assert_eq!(cli.buffer_size, 4096);
    }
}
