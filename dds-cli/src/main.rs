mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Args, Command};
use dds_deliver::discovery::collect_inputs;
use dds_deliver::{
    DeliveryConfig, DeliverySession, HttpMetadataStore, MetadataStore, ObjectStore, S3ObjectStore,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let log = logging::init();

    let success = run(args, &log).await?;
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run(args: Args, log: &logging::SessionLog) -> Result<bool> {
    let mut config = match &args.config {
        Some(path) => DeliveryConfig::from_file(path)?,
        None => DeliveryConfig::default(),
    };
    let credentials = args.credentials()?;

    // Inputs are validated before anything touches the network.
    let inputs = match &args.command {
        Command::Put {
            sources,
            path_list,
            break_on_fail,
            overwrite,
            ..
        } => {
            if let Some(break_on_fail) = break_on_fail {
                config.break_on_fail = *break_on_fail;
            }
            config.overwrite |= *overwrite;
            collect_inputs(sources, path_list.as_deref())?
        }
        Command::Get {
            verify_checksum, ..
        } => {
            config.verify_checksum |= *verify_checksum;
            Vec::new()
        }
        _ => Vec::new(),
    };

    let metadata: Arc<dyn MetadataStore> = Arc::new(HttpMetadataStore::new(&config)?);
    let objects: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::connect(&config, None).await?);

    let session = DeliverySession::open(
        config,
        &credentials,
        args.command.direction(),
        objects,
        metadata,
    )
    .await?;
    let logs_dir = session.workspace().logs_dir().to_path_buf();
    log.attach(&logs_dir)
        .with_context(|| format!("cannot create log file in {}", logs_dir.display()))?;

    let cancel = session.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after in-flight files");
            cancel.cancel();
        }
    });

    let success = match &args.command {
        Command::Put { .. } => {
            let report = session.put(&inputs).await?;
            print!("{}", report.summary.render());
            report.summary.is_success()
        }
        Command::Get {
            paths,
            get_all,
            destination,
            ..
        } => {
            let report = if *get_all {
                session.get_all(destination).await?
            } else {
                session.get(paths, destination).await?
            };
            print!("{}", report.summary.render());
            report.summary.is_success()
        }
        Command::Ls { folder } => {
            let files = session.list(folder.as_deref()).await?;
            for file in &files {
                println!(
                    "{:>12}  {}  {}",
                    file.size,
                    file.registered_at.format("%Y-%m-%d %H:%M"),
                    file.key
                );
            }
            true
        }
        Command::Rm { paths, all } => {
            let report = if *all {
                session.remove_all().await?
            } else {
                session.remove(paths).await?
            };
            for key in &report.removed {
                println!("removed  {key}");
            }
            for path in &report.not_exists {
                println!("missing  {path}");
            }
            for (key, error) in &report.not_removed {
                println!("failed   {key}: {error}");
            }
            report.is_success()
        }
    };

    let leftover = session.close();
    if leftover > 0 {
        warn!("{leftover} temporary file(s) could not be removed");
    }
    info!("session logs kept in {}", logs_dir.display());
    Ok(success)
}
