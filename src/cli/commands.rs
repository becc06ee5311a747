//! 命令处理
//!
//! 每个处理函数返回进程退出码；只有参数/环境层面的错误才以 `anyhow::Error` 返回

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::render;
use crate::config::env::constants::{COPY_TIMEOUT_SECS, FEDERATION_NAME};
use crate::config::{PyprojectStore, RuntimeSettings};
use crate::domain::stack::SpinRequest;
use crate::domain::tunnel::RemoteHost;
use crate::infra::control_plane::{ControlPlane, HttpConnector, HttpControlPlane};
use crate::infra::remote::SshTransport;
use crate::services::pipeline::{Collaborators, Orchestrator, PipelineReport, RunOptions};
use crate::services::tunnel::SshTunnelManager;
use crate::services::workload::FlwrRunner;

/// SLURM 作业参数
#[derive(Clone, Debug, Default)]
pub struct JobArgs {
    pub partition: Option<String>,
    pub memory: Option<String>,
    pub time: Option<String>,
}

impl JobArgs {
    pub fn into_request(self, num_nodes: u32) -> SpinRequest {
        SpinRequest {
            num_nodes,
            partition: self.partition,
            memory: self.memory,
            time_limit: self.time,
        }
    }
}

/// 生产环境的协作者
pub fn collaborators(settings: &RuntimeSettings, project_dir: &Path) -> Collaborators {
    Collaborators {
        config: Arc::new(PyprojectStore::new(project_dir)),
        transport: Arc::new(SshTransport::new(
            settings,
            Duration::from_secs(COPY_TIMEOUT_SECS),
        )),
        tunnels: Arc::new(SshTunnelManager::new(settings)),
        control: Arc::new(HttpConnector),
        workload: Arc::new(FlwrRunner::new(settings.flwr_program.clone())),
    }
}

fn finish_pipeline(report: PipelineReport) -> i32 {
    println!("{}", render::pipeline_summary(&report.run));
    if let Some(error) = &report.error {
        eprintln!("{}", render::failure_line(error));
    }
    report.exit_code()
}

pub async fn init(login_node: &str, dir: &Path) -> Result<i32> {
    let host = RemoteHost::new(login_node).context("Invalid login node")?;
    let store = PyprojectStore::new(dir);

    println!("📝 Initializing floralab configuration...");
    println!("   Project: {}", dir.display());
    println!("   Login node: {}", host);

    let report = match store.init(&host).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("✗ config: {}", e);
            return Ok(1);
        }
    };

    if report.added_floralab {
        println!("✓ Added [tool.floralab] configuration");
    } else if report.updated_login_node {
        println!("  Updated login-node to: {}", host);
    } else {
        println!("  [tool.floralab] already exists");
    }
    if report.added_federation {
        println!("✓ Added [tool.flwr.federations.{}] configuration", FEDERATION_NAME);
    }

    if report.modified() {
        println!("\n✨ Configuration initialized successfully!");
    } else {
        println!("\n  Configuration already up to date");
    }
    Ok(0)
}

pub async fn run(
    settings: &RuntimeSettings,
    dir: &Path,
    num_nodes: u32,
    job: JobArgs,
    ssh_port: u16,
    cancel_token: CancellationToken,
) -> Result<i32> {
    if num_nodes == 0 {
        anyhow::bail!("--nodes must be at least 1");
    }

    println!("🚀 Running Flower project on SLURM ({} client nodes)", num_nodes);
    let options = RunOptions::new(job.into_request(num_nodes), ssh_port, settings);
    let orchestrator = Orchestrator::new(collaborators(settings, dir), cancel_token);
    let report = orchestrator.run(&options).await;
    Ok(finish_pipeline(report))
}

pub async fn stop(
    settings: &RuntimeSettings,
    dir: &Path,
    ssh_port: u16,
    cancel_token: CancellationToken,
) -> Result<i32> {
    println!("🛑 Stopping Flower stack...");
    let orchestrator = Orchestrator::new(collaborators(settings, dir), cancel_token);
    let report = orchestrator.stop(ssh_port, settings.remote_api_port).await;
    Ok(finish_pipeline(report))
}

fn direct_client(settings: &RuntimeSettings, api_url: Option<String>) -> Result<HttpControlPlane> {
    let url = api_url.unwrap_or_else(|| settings.api_url.clone());
    debug!(api_url = %url, "Using florago API directly");
    HttpControlPlane::new(&url).context("Failed to create HTTP client")
}

pub async fn spin(
    settings: &RuntimeSettings,
    num_nodes: u32,
    job: JobArgs,
    api_url: Option<String>,
) -> Result<i32> {
    let client = direct_client(settings, api_url)?;
    println!("🚀 Spinning up Flower stack with {} client nodes...", num_nodes);
    println!("   API: {}", client.base_url());

    match client.provision(&job.into_request(num_nodes)).await {
        Ok(outcome) => {
            print!("{}", render::spin_outcome(&outcome));
            Ok(0)
        }
        Err(e) => {
            eprintln!("{}", render::control_failure_line(&e));
            Ok(1)
        }
    }
}

pub async fn status(settings: &RuntimeSettings, verbose: bool, api_url: Option<String>) -> Result<i32> {
    let client = direct_client(settings, api_url)?;
    println!("📊 Checking Flower stack status...");
    println!("   API: {}", client.base_url());

    match client.get_status().await {
        Ok(snapshot) => {
            println!("{}", render::stack_status(&snapshot, verbose));
            Ok(0)
        }
        Err(e) => {
            eprintln!("{}", render::control_failure_line(&e));
            Ok(1)
        }
    }
}

pub async fn down(settings: &RuntimeSettings, force: bool, api_url: Option<String>) -> Result<i32> {
    let client = direct_client(settings, api_url)?;

    if !force
        && !confirm("⚠️  This will cancel the SLURM job and stop all Flower nodes. Continue?")
            .await?
    {
        println!("Cancelled.");
        return Ok(0);
    }

    println!("🛑 Tearing down Flower stack...");
    println!("   API: {}", client.base_url());

    match client.deprovision().await {
        Ok(job_id) => {
            println!("✓ Flower stack job cancelled: {}", job_id);
            Ok(0)
        }
        Err(e) => {
            eprintln!("{}", render::control_failure_line(&e));
            Ok(1)
        }
    }
}

pub async fn monitoring(settings: &RuntimeSettings, api_url: Option<String>) -> Result<i32> {
    let client = direct_client(settings, api_url)?;
    println!("📈 Fetching monitoring data...");
    println!("   API: {}", client.base_url());

    match client.monitoring().await {
        Ok(report) => {
            println!("{}", render::monitoring(&report));
            Ok(0)
        }
        Err(e) => {
            eprintln!("{}", render::control_failure_line(&e));
            Ok(1)
        }
    }
}

pub async fn health(settings: &RuntimeSettings, api_url: Option<String>) -> Result<i32> {
    let client = direct_client(settings, api_url)?;
    match client.health().await {
        Ok(report) => {
            print!("{}", render::health(&report));
            Ok(0)
        }
        Err(e) => {
            eprintln!("✗ API server unreachable: {}", e);
            Ok(1)
        }
    }
}

/// 在 stdin 上确认（y/yes）
async fn confirm(prompt: &str) -> Result<bool> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{} [y/N]: ", prompt).as_bytes()).await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read confirmation")?;
    Ok(is_affirmative(&line))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_affirmative() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative(" YES "));
        assert!(!is_affirmative("\n"));
        assert!(!is_affirmative("nope"));
    }

    #[test]
    fn test_job_args_into_request() {
        let request = JobArgs {
            partition: Some("gpu".into()),
            memory: None,
            time: Some("00:30:00".into()),
        }
        .into_request(3);
        assert_eq!(request.num_nodes, 3);
        assert_eq!(request.time_limit.as_deref(), Some("00:30:00"));
    }

    #[tokio::test]
    async fn test_init_reports_missing_pyproject() {
        let dir = tempfile::TempDir::new().unwrap();
        let code = init("login01", dir.path()).await.unwrap();
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn test_init_rejects_blank_login_node() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(init("   ", dir.path()).await.is_err());
    }
}
