use anoncast_keystore::ChannelId;

use crate::cmd::{ChannelCommand, Context};
use crate::exit::{keystore_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_channels, print_event, ChannelSummary};

pub fn run(command: ChannelCommand, ctx: &Context) -> CliResult<i32> {
    let store = ctx.open_store()?;

    match command {
        ChannelCommand::New(args) => {
            let id = ChannelId::new_random();
            store
                .add_key_pack(id)
                .map_err(|err| keystore_error("failed to create channel", err))?;
            if let Some(bundle) = &args.bundle {
                store
                    .export_key_pack(id, bundle)
                    .map_err(|err| keystore_error("failed to export bundle", err))?;
            }
            print_event("created", Some(id), None, ctx.format);
        }
        ChannelCommand::List => {
            let summaries: Vec<ChannelSummary> = store
                .channel_ids()
                .into_iter()
                .filter_map(|id| store.get_key_pack(id))
                .map(|pack| ChannelSummary::from_pack(&pack))
                .collect();
            print_channels(&summaries, ctx.format);
        }
        ChannelCommand::Remove(args) => {
            let removed = store
                .delete_key_pack(args.channel)
                .map_err(|err| keystore_error("failed to remove channel", err))?;
            if !removed {
                return Err(CliError::new(
                    DATA_INVALID,
                    format!("unknown channel {}", args.channel),
                ));
            }
            print_event("removed", Some(args.channel), None, ctx.format);
        }
        ChannelCommand::Export(args) => {
            store
                .export_key_pack(args.channel, &args.dest)
                .map_err(|err| keystore_error("failed to export bundle", err))?;
            let dest = args.dest.display().to_string();
            print_event("exported", Some(args.channel), Some(&dest), ctx.format);
        }
        ChannelCommand::Import(args) => {
            let pack = store
                .import_key_pack(&args.bundle)
                .map_err(|err| keystore_error("failed to import bundle", err))?;
            print_event("imported", Some(pack.id()), None, ctx.format);
        }
    }

    store.close();
    Ok(SUCCESS)
}
