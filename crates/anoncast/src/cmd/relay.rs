use anoncast_client::{Relay, RelayConfig};

use crate::cmd::{parse_duration, Context, RelayArgs};
use crate::exit::{client_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::print_event;

pub fn run(args: RelayArgs, ctx: &Context) -> CliResult<i32> {
    let config = RelayConfig {
        max_package_size: ctx.max_package_size,
        write_timeout: Some(parse_duration(&args.write_timeout)?),
    };
    let relay = Relay::bind(&args.address, config).map_err(|err| client_error("bind failed", err))?;
    let endpoint = relay
        .local_endpoint()
        .map_err(|err| client_error("bind failed", err))?;
    let handle = relay
        .handle()
        .map_err(|err| client_error("bind failed", err))?;

    ctrlc::set_handler(move || handle.stop())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;

    let endpoint = endpoint.to_string();
    print_event("listening", None, Some(&endpoint), ctx.format);
    relay
        .serve()
        .map_err(|err| client_error("relay failed", err))?;
    Ok(SUCCESS)
}
