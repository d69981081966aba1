use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pondstage::common::config::{
    apply_overrides, load_config, AppConfig, ConfigOverrides, ServerConfig,
};
use pondstage::server;
use pondstage::storage::Mounts;
use pondstage::transfer::{CommitOutcome, TransferManager};

#[derive(Parser)]
#[command(name = "pondstage")]
#[command(about = "Staging server for upload widgets")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve every configured upload endpoint
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Move staged transfers to their final location
    Commit {
        /// Server whose staging area to read (defaults to `default_server`)
        #[arg(long)]
        server: Option<String>,
        /// Filesystem to commit into (defaults to the server's own)
        #[arg(long)]
        target: Option<String>,
        /// Destination directory (defaults to the server's upload_path)
        #[arg(long)]
        upload_path: Option<String>,
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Discard one staged transfer
    Revert {
        /// Defaults to `default_server`
        #[arg(long)]
        server: Option<String>,
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind, port } => {
            let config = apply_overrides(config, &ConfigOverrides { bind, port });
            server::serve(&config).await
        }
        Commands::Commit {
            server,
            target,
            upload_path,
            ids,
        } => commit(&config, server.as_deref(), target, upload_path, &ids).await,
        Commands::Revert { server, id } => revert(&config, server.as_deref(), &id).await,
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pondstage=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn manager_for(config: &AppConfig, server: &ServerConfig) -> Result<TransferManager> {
    let mounts = Mounts::from_config(config).context("Failed to set up filesystems")?;
    Ok(TransferManager::new(
        Arc::new(mounts),
        server.filesystem_ident.clone(),
    ))
}

async fn commit(
    config: &AppConfig,
    server_name: Option<&str>,
    target: Option<String>,
    upload_path: Option<String>,
    ids: &[String],
) -> Result<()> {
    let (name, server) = config.select_server(server_name)?;
    let mut manager = manager_for(config, server)?;
    if let Some(target) = target {
        if !config.filesystems.contains_key(&target) {
            bail!("Unknown filesystem '{target}'");
        }
        manager = manager.with_target(target);
    }
    let upload_path = upload_path.unwrap_or_else(|| server.upload_path.clone());

    tracing::info!(server = %name, count = ids.len(), "Committing transfers");
    let outcomes = manager
        .commit_transfer_ids(&server.transfer_dir, ids, &upload_path)
        .await;

    let mut failed = 0;
    for outcome in &outcomes {
        match outcome {
            CommitOutcome::Committed(path) => println!("{path}"),
            CommitOutcome::Passthrough(id) => {
                tracing::warn!(transfer_id = %id, "No staged transfer");
                println!("{id}");
            }
            CommitOutcome::Failed(name) => {
                failed += 1;
                eprintln!("Failed to commit {name}");
            }
        }
    }

    if failed > 0 {
        bail!("{failed} file(s) could not be committed");
    }
    Ok(())
}

async fn revert(config: &AppConfig, server_name: Option<&str>, id: &str) -> Result<()> {
    let (name, server) = config.select_server(server_name)?;
    let manager = manager_for(config, server)?;

    if !manager.is_valid_transfer_id(id) {
        bail!("Invalid transfer id '{id}'");
    }
    if !manager
        .remove_transfer_directory(&server.transfer_dir, id)
        .await
    {
        bail!("No staged transfer '{id}'");
    }

    tracing::info!(server = %name, transfer_id = %id, "Reverted transfer");
    println!("Reverted {id}");
    Ok(())
}
