//! FloraLab CLI
//!
//! Usage:
//! - Configure a project: `floralab init user@login.hpc.example`
//! - Full run: `floralab run --nodes 2`
//! - Tear down: `floralab stop`
//! - Direct API access (existing tunnel): `floralab status`, `floralab spin 2`, `floralab down`

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use floralab::cli::commands::{self, JobArgs};
use floralab::cli::{Cli, Commands};
use floralab::RuntimeSettings;

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    Ok(())
}

/// Ctrl-C 取消当前流水线；隧道仍会被关闭
fn spawn_ctrl_c(cancel_token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cleaning up");
            cancel_token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let settings = RuntimeSettings::from_env();
    let cancel_token = CancellationToken::new();
    spawn_ctrl_c(cancel_token.clone());

    let code = match cli.command {
        Commands::Init { login_node, dir } => commands::init(&login_node, &dir).await?,
        Commands::Run {
            nodes,
            partition,
            memory,
            time,
            ssh_port,
            dir,
        } => {
            let job = JobArgs {
                partition,
                memory,
                time,
            };
            commands::run(&settings, &dir, nodes, job, ssh_port, cancel_token).await?
        }
        Commands::Stop { ssh_port, dir } => {
            commands::stop(&settings, &dir, ssh_port, cancel_token).await?
        }
        Commands::Spin {
            num_nodes,
            partition,
            memory,
            time,
            api_url,
        } => {
            let job = JobArgs {
                partition,
                memory,
                time,
            };
            commands::spin(&settings, num_nodes, job, api_url).await?
        }
        Commands::Status { verbose, api_url } => {
            commands::status(&settings, verbose, api_url).await?
        }
        Commands::Down { force, api_url } => commands::down(&settings, force, api_url).await?,
        Commands::Monitoring { api_url } => commands::monitoring(&settings, api_url).await?,
        Commands::Health { api_url } => commands::health(&settings, api_url).await?,
    };

    std::process::exit(code);
}
