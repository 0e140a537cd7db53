//! The `custody` command line client.

use std::path::Path;

use anyhow::{Context, Result};
use engine_api::client::EngineApiClient;
use file_system_monitor::{FileIdResolver, InodeResolver};

mod term_print;

use crate::{
    cli::custody::{Commands, CustodyCliOpts, Register},
    custody::term_print::{FamilyFiles, FamilyMembers, TermPrintable},
};

pub async fn custody_cli_run(options: &CustodyCliOpts) -> Result<()> {
    log::trace!("Custody CLI Options: {:?}", options);

    let engine_api_client = if let Some(api_server) = &options.api_server {
        EngineApiClient::unix(api_server.clone())?
    } else {
        EngineApiClient::new()?
    };

    log::trace!("Command received: {:?}", options.command);

    match &options.command {
        Commands::Status => engine_api_client.families().await?.term_print(),
        Commands::Version => engine_api_client.version().await?.term_print(),
        Commands::Register(Register {
            pid,
            origin,
            origin_path,
            policy,
        }) => {
            let origin = match (origin, origin_path) {
                (Some(origin), _) => *origin,
                (None, Some(path)) => InodeResolver
                    .resolve(Path::new(path))
                    .with_context(|| format!("cannot identify {path}"))?,
                (None, None) => Default::default(),
            };
            let root = engine_api_client
                .register_family(*pid, origin, *policy)
                .await?;
            format!("Watching family {root}").term_print()
        }
        Commands::Unregister { pid } => {
            let message = if engine_api_client.unregister_family(*pid).await? {
                format!("Process {pid} released")
            } else {
                format!("Process {pid} was not watched")
            };
            message.term_print()
        }
        Commands::Terminate { pid } => {
            let pids = engine_api_client.terminate_family(*pid).await?;
            format!("Terminated {} processes", pids.len()).term_print()
        }
        Commands::Members { pid } => FamilyMembers {
            root: *pid,
            pids: engine_api_client.members(*pid).await?,
        }
        .term_print(),
        Commands::Files { pid } => FamilyFiles {
            root: *pid,
            files: engine_api_client.files(*pid).await?,
        }
        .term_print(),
        Commands::Wait { pid, timeout_ms } => engine_api_client
            .wait_for_exit(*pid, *timeout_ms)
            .await?
            .term_print(),
    }?;

    Ok(())
}
