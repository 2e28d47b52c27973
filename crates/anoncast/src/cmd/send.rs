use std::fs;

use anoncast_client::Client;

use crate::cmd::{Context, SendArgs};
use crate::exit::{client_error, io_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::print_event;

pub fn run(args: SendArgs, ctx: &Context) -> CliResult<i32> {
    let client = Client::new(ctx.client_config(args.address.clone()))
        .map_err(|err| client_error("failed to open client", err))?;
    if client.store().get_key_pack(args.channel).is_none() {
        return Err(CliError::new(
            USAGE,
            format!("unknown channel {}", args.channel),
        ));
    }

    let payload = resolve_payload(&args)?;
    client
        .start()
        .map_err(|err| client_error("connect failed", err))?;
    client
        .write(args.channel, &payload)
        .map_err(|err| client_error("send failed", err))?;
    client.close();

    let size = format!("size={}", payload.len());
    print_event("sent", Some(args.channel), Some(&size), ctx.format);
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}
