//! 流水线编排
//!
//! `run`：拷贝 florago → 初始化 → 启动 API server → 打开隧道 → 申请 stack →
//! 等待就绪 → 写入 federation 地址 → 运行 flwr → 关闭隧道。
//!
//! `stop`：打开临时隧道 → 取消 stack → 关闭隧道。
//!
//! 隧道只在一个地方关闭：流水线主体（无论成功、失败还是被取消）结束之后。

pub mod context;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::env::constants::{
    INIT_TIMEOUT_SECS, PROCESS_PROBE_ATTEMPTS, REMOTE_BINARY_PATH, REMOTE_COMMAND_TIMEOUT_SECS,
    REMOTE_SERVER_LOG, SERVICE_PROBE_ATTEMPTS, SERVICE_PROBE_DELAY_MS,
};
use crate::config::{ConfigStore, RuntimeSettings};
use crate::domain::pipeline::{PipelineOutcome, PipelineRun, PipelineStep};
use crate::domain::stack::SpinRequest;
use crate::domain::tunnel::{RemoteHost, TunnelHandle};
use crate::error::{PipelineError, TransportError};
use crate::infra::control_plane::{ControlPlane, ControlPlaneConnector};
use crate::infra::remote::RemoteTransport;
use crate::services::readiness::{PollProgress, ReadinessPoller};
use crate::services::tunnel::TunnelManager;
use crate::services::workload::WorkloadRunner;

pub use context::RunContext;

/// `florago init` 输出中表示 "已初始化" 的标记（忽略大小写）
pub const ALREADY_INITIALIZED_MARKERS: [&str; 3] =
    ["already initialized", "already initialised", "already exists"];

/// 流水线依赖的外部协作者
#[derive(Clone)]
pub struct Collaborators {
    pub config: Arc<dyn ConfigStore>,
    pub transport: Arc<dyn RemoteTransport>,
    pub tunnels: Arc<dyn TunnelManager>,
    pub control: Arc<dyn ControlPlaneConnector>,
    pub workload: Arc<dyn WorkloadRunner>,
}

/// 有限次数的探测
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbePolicy {
    pub attempts: u32,
    pub delay: Duration,
}

/// `run` 的参数
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub request: SpinRequest,
    /// 本地 florago 二进制
    pub artifact: PathBuf,
    pub local_port: u16,
    pub remote_port: u16,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    /// 写入 federation address 的主机
    pub endpoint_host: String,
    /// 隧道打开后的 /health 探测
    pub service_probe: ProbePolicy,
    /// 启动后的 `pgrep` 探测
    pub process_probe: ProbePolicy,
}

impl RunOptions {
    pub fn new(request: SpinRequest, local_port: u16, settings: &RuntimeSettings) -> Self {
        Self {
            request,
            artifact: settings.florago_binary.clone(),
            local_port,
            remote_port: settings.remote_api_port,
            ready_timeout: settings.ready_timeout,
            poll_interval: settings.poll_interval,
            endpoint_host: settings.endpoint_host.clone(),
            service_probe: ProbePolicy {
                attempts: SERVICE_PROBE_ATTEMPTS,
                delay: Duration::from_millis(SERVICE_PROBE_DELAY_MS),
            },
            process_probe: ProbePolicy {
                attempts: PROCESS_PROBE_ATTEMPTS,
                delay: Duration::from_millis(SERVICE_PROBE_DELAY_MS),
            },
        }
    }
}

/// 一次流水线执行的结果
#[derive(Debug)]
pub struct PipelineReport {
    pub run: PipelineRun,
    pub error: Option<PipelineError>,
}

impl PipelineReport {
    pub fn outcome(&self) -> PipelineOutcome {
        self.run.outcome()
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome().exit_code()
    }
}

/// 流水线编排器
pub struct Orchestrator {
    deps: Collaborators,
    cancel_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(deps: Collaborators, cancel_token: CancellationToken) -> Self {
        Self { deps, cancel_token }
    }

    /// 执行完整的 `run` 流水线
    pub async fn run(&self, options: &RunOptions) -> PipelineReport {
        let mut ctx = RunContext::new(&PipelineStep::RUN);
        let mut tunnel: Option<TunnelHandle> = None;

        info!(
            run_id = %ctx.run_id(),
            num_nodes = options.request.num_nodes,
            local_port = options.local_port,
            "Starting floralab run"
        );

        let result = {
            let body = self.run_body(&mut ctx, options, &mut tunnel);
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => Err(PipelineError::Cancelled),
                result = body => result,
            }
        };

        self.release_tunnel(&mut ctx, tunnel).await;
        Self::report(ctx, result)
    }

    /// 执行 `stop`：经临时隧道取消远端 stack
    pub async fn stop(&self, local_port: u16, remote_port: u16) -> PipelineReport {
        let mut ctx = RunContext::new(&PipelineStep::STOP);
        let mut tunnel: Option<TunnelHandle> = None;

        info!(run_id = %ctx.run_id(), local_port, "Stopping Flower stack");

        let result = {
            let body = self.stop_body(&mut ctx, local_port, remote_port, &mut tunnel);
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => Err(PipelineError::Cancelled),
                result = body => result,
            }
        };

        self.release_tunnel(&mut ctx, tunnel).await;
        Self::report(ctx, result)
    }

    fn report(ctx: RunContext, result: Result<(), PipelineError>) -> PipelineReport {
        let run = ctx.finish(&result);
        PipelineReport {
            run,
            error: result.err(),
        }
    }

    async fn run_body(
        &self,
        ctx: &mut RunContext,
        options: &RunOptions,
        tunnel: &mut Option<TunnelHandle>,
    ) -> Result<(), PipelineError> {
        let host = self.load_config(ctx).await?;
        self.copy_artifact(ctx, &host, options).await?;
        self.bootstrap(ctx, &host).await?;
        self.start_service(ctx, &host, options).await;

        let control = self
            .open_tunnel(ctx, &host, options.local_port, options.remote_port, tunnel)
            .await?;
        self.probe_service(ctx, control.as_ref(), options.service_probe)
            .await;

        // Step 6: provision
        let step = PipelineStep::Provision;
        ctx.begin(step);
        let outcome = control
            .provision(&options.request)
            .await
            .map_err(|source| PipelineError::Control { step, source })?;
        ctx.run.job_id = Some(outcome.job_id.clone());
        ctx.succeed(step, Some(format!("job {}", outcome.job_id)));

        // Step 7: await readiness
        let step = PipelineStep::AwaitReady;
        ctx.begin(step);
        let poller = ReadinessPoller::new(options.poll_interval, options.endpoint_host.clone());
        let run_id = ctx.run_id().to_string();
        let endpoint = poller
            .await_ready(control.as_ref(), options.ready_timeout, |p| {
                log_progress(&run_id, p)
            })
            .await
            .map_err(|source| PipelineError::Poll { step, source })?;
        ctx.run.endpoint = Some(endpoint.clone());
        ctx.succeed(step, Some(endpoint.to_string()));

        // Step 8: persist the endpoint (warning only)
        let step = PipelineStep::PersistEndpoint;
        ctx.begin(step);
        match self
            .deps
            .config
            .set_federation_address(&endpoint.to_string())
            .await
        {
            Ok(()) => ctx.succeed(
                step,
                Some(format!("{} = {}", self.deps.config.federation(), endpoint)),
            ),
            Err(e) => ctx.degrade(step, format!("could not update federation address: {}", e)),
        }

        // Step 9: workload
        let step = PipelineStep::RunWorkload;
        ctx.begin(step);
        self.deps
            .workload
            .run(self.deps.config.federation(), self.deps.config.project_dir())
            .await
            .map_err(|source| PipelineError::Workload { step, source })?;
        ctx.succeed(step, None);

        Ok(())
    }

    async fn stop_body(
        &self,
        ctx: &mut RunContext,
        local_port: u16,
        remote_port: u16,
        tunnel: &mut Option<TunnelHandle>,
    ) -> Result<(), PipelineError> {
        let host = self.load_config(ctx).await?;
        let control = self
            .open_tunnel(ctx, &host, local_port, remote_port, tunnel)
            .await?;

        let step = PipelineStep::Deprovision;
        ctx.begin(step);
        let job_id = control
            .deprovision()
            .await
            .map_err(|source| PipelineError::Control { step, source })?;
        ctx.run.job_id = Some(job_id.clone());
        ctx.succeed(step, Some(format!("job {} cancelled", job_id)));

        Ok(())
    }

    /// Step 1
    async fn load_config(&self, ctx: &mut RunContext) -> Result<RemoteHost, PipelineError> {
        let step = PipelineStep::LoadConfig;
        ctx.begin(step);
        let config = self.deps.config.load().await?;
        let host = config.remote_host()?;
        ctx.run.remote_host = Some(host.clone());
        ctx.succeed(step, Some(format!("login node {}", host)));
        Ok(host)
    }

    /// Step 2：拷贝失败致命，chmod 尽力而为
    async fn copy_artifact(
        &self,
        ctx: &mut RunContext,
        host: &RemoteHost,
        options: &RunOptions,
    ) -> Result<(), PipelineError> {
        let step = PipelineStep::CopyArtifact;
        ctx.begin(step);
        self.deps
            .transport
            .copy(&options.artifact, host, REMOTE_BINARY_PATH)
            .await
            .map_err(|source| PipelineError::Transport { step, source })?;

        let chmod = format!("chmod +x {}", REMOTE_BINARY_PATH);
        let result = self
            .deps
            .transport
            .run_remote(host, &chmod, Duration::from_secs(REMOTE_COMMAND_TIMEOUT_SECS))
            .await
            .and_then(|output| output.into_checked(&chmod));
        match result {
            Ok(_) => ctx.succeed(step, None),
            Err(e) => ctx.degrade(step, format!("copied, but chmod failed: {}", e)),
        }
        Ok(())
    }

    /// Step 3：非零退出时，输出中含 "已初始化" 标记视为成功
    async fn bootstrap(&self, ctx: &mut RunContext, host: &RemoteHost) -> Result<(), PipelineError> {
        let step = PipelineStep::Bootstrap;
        ctx.begin(step);
        let command = format!("{} init", REMOTE_BINARY_PATH);
        let output = self
            .deps
            .transport
            .run_remote(host, &command, Duration::from_secs(INIT_TIMEOUT_SECS))
            .await
            .map_err(|source| PipelineError::Transport { step, source })?;

        if output.success() {
            ctx.succeed(step, None);
        } else if output.mentions_any(&ALREADY_INITIALIZED_MARKERS) {
            info!(exit_code = output.exit_code, "florago environment already initialized");
            ctx.succeed(step, Some("already initialized".to_string()));
        } else {
            return Err(PipelineError::Transport {
                step,
                source: TransportError::NonZeroExit {
                    command,
                    code: output.exit_code,
                    stderr: output.stderr.trim().to_string(),
                },
            });
        }
        Ok(())
    }

    /// Step 4：尽力而为，失败只记录警告
    async fn start_service(&self, ctx: &mut RunContext, host: &RemoteHost, options: &RunOptions) {
        let step = PipelineStep::StartService;
        ctx.begin(step);
        let command = format!(
            "{} start --host 0.0.0.0 --port {}",
            REMOTE_BINARY_PATH, options.remote_port
        );

        if let Err(e) = self
            .deps
            .transport
            .run_remote_background(host, &command, REMOTE_SERVER_LOG)
            .await
        {
            ctx.degrade(step, format!("failed to start florago API server: {}", e));
            return;
        }

        if self.process_running(host, options.process_probe).await {
            ctx.succeed(step, Some(format!("log: {}", REMOTE_SERVER_LOG)));
        } else {
            ctx.degrade(
                step,
                format!(
                    "florago API server process not detected; check {}",
                    REMOTE_SERVER_LOG
                ),
            );
        }
    }

    async fn process_running(&self, host: &RemoteHost, probe: ProbePolicy) -> bool {
        let command = "pgrep -f \"florago start\"";
        for attempt in 1..=probe.attempts {
            match self
                .deps
                .transport
                .run_remote(host, command, Duration::from_secs(REMOTE_COMMAND_TIMEOUT_SECS))
                .await
            {
                Ok(output) if output.success() => {
                    debug!(attempt, pids = %output.stdout.trim(), "florago API server running");
                    return true;
                }
                Ok(_) => debug!(attempt, "florago API server not running yet"),
                Err(e) => debug!(attempt, error = %e, "Process probe failed"),
            }
            if attempt < probe.attempts {
                sleep(probe.delay).await;
            }
        }
        false
    }

    /// Step 5：打开隧道并连接控制平面
    async fn open_tunnel(
        &self,
        ctx: &mut RunContext,
        host: &RemoteHost,
        local_port: u16,
        remote_port: u16,
        tunnel: &mut Option<TunnelHandle>,
    ) -> Result<Arc<dyn ControlPlane>, PipelineError> {
        let step = PipelineStep::OpenTunnel;
        ctx.begin(step);
        let handle = self
            .deps
            .tunnels
            .open(host, local_port, remote_port)
            .await
            .map_err(|source| PipelineError::Tunnel { step, source })?;
        let base_url = handle.local_url();
        *tunnel = Some(handle);

        let control = self
            .deps
            .control
            .connect(&base_url)
            .map_err(|source| PipelineError::Control { step, source })?;
        ctx.succeed(step, Some(base_url));
        Ok(control)
    }

    /// 隧道打开后探测 API server，只作提示
    async fn probe_service(&self, ctx: &RunContext, control: &dyn ControlPlane, probe: ProbePolicy) {
        for attempt in 1..=probe.attempts {
            match control.health().await {
                Ok(report) => {
                    debug!(attempt, status = %report.status, "florago API server healthy");
                    return;
                }
                Err(e) => debug!(attempt, error = %e, "Health probe failed"),
            }
            if attempt < probe.attempts {
                sleep(probe.delay).await;
            }
        }
        warn!(
            run_id = %ctx.run_id(),
            attempts = probe.attempts,
            "florago API server did not answer /health; continuing"
        );
    }

    /// Step 10：所有路径上都会执行
    async fn release_tunnel(&self, ctx: &mut RunContext, tunnel: Option<TunnelHandle>) {
        let step = PipelineStep::ReleaseTunnel;
        match tunnel {
            Some(handle) => {
                ctx.begin(step);
                self.deps.tunnels.close(&handle).await;
                ctx.succeed(step, Some(format!("local port {}", handle.local_port())));
            }
            None => ctx.skip(step, "no tunnel was opened"),
        }
    }
}

fn log_progress(run_id: &str, progress: &PollProgress) {
    match &progress.error {
        Some(error) => warn!(
            run_id = %run_id,
            attempt = progress.attempt,
            error = %error,
            "Waiting for stack"
        ),
        None => info!(
            run_id = %run_id,
            attempt = progress.attempt,
            status = %progress.status,
            completed = progress.completed,
            expected = progress.expected,
            "Waiting for stack"
        ),
    }
}
