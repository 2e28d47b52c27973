use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anoncast_client::{Client, ClientConfig, ClientError};
use tracing::warn;

use crate::cmd::{parse_duration, Context, ListenArgs};
use crate::exit::{client_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::print_frame;

/// Receive wakeup interval used to check for ctrl-c and the idle timeout.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: ListenArgs, ctx: &Context) -> CliResult<i32> {
    let idle_timeout = args.timeout.as_deref().map(parse_duration).transpose()?;
    let config = ClientConfig {
        read_timeout: Some(POLL_INTERVAL),
        drop_on_broken_length: args.drop_on_broken_length,
        ..ctx.client_config(args.address.clone())
    };
    let client = Client::new(config).map_err(|err| client_error("failed to open client", err))?;
    client
        .start()
        .map_err(|err| client_error("connect failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let mut printed = 0usize;
    let mut last_activity = Instant::now();

    while running.load(Ordering::SeqCst) {
        let frame = match client.receive() {
            Ok(frame) => frame,
            Err(ClientError::Timeout) => {
                if idle_timeout.is_some_and(|limit| last_activity.elapsed() >= limit) {
                    client.close();
                    return Err(CliError::new(TIMEOUT, "no message before idle timeout"));
                }
                continue;
            }
            Err(err @ ClientError::BrokenPackageRecv(_)) => {
                warn!(error = %err, "skipping broken message");
                if !client.is_connected() {
                    return Err(client_error("receive failed", err));
                }
                continue;
            }
            Err(err) => return Err(client_error("receive failed", err)),
        };
        last_activity = Instant::now();

        if let Some(channels) = &args.channels {
            if !channels.contains(&frame.channel) {
                continue;
            }
        }

        print_frame(&frame, ctx.format);
        printed = printed.saturating_add(1);

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    client.close();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
