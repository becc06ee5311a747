//! 部署流水线相关领域模型

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::stack::ControlEndpoint;
use crate::domain::tunnel::RemoteHost;

/// 流水线步骤（顺序即执行顺序）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    LoadConfig,
    CopyArtifact,
    Bootstrap,
    StartService,
    OpenTunnel,
    Provision,
    AwaitReady,
    PersistEndpoint,
    RunWorkload,
    ReleaseTunnel,
    /// 仅用于 `stop`
    Deprovision,
}

impl PipelineStep {
    /// `run` 命令的全部步骤
    pub const RUN: [PipelineStep; 10] = [
        PipelineStep::LoadConfig,
        PipelineStep::CopyArtifact,
        PipelineStep::Bootstrap,
        PipelineStep::StartService,
        PipelineStep::OpenTunnel,
        PipelineStep::Provision,
        PipelineStep::AwaitReady,
        PipelineStep::PersistEndpoint,
        PipelineStep::RunWorkload,
        PipelineStep::ReleaseTunnel,
    ];

    /// `stop` 命令的步骤
    pub const STOP: [PipelineStep; 4] = [
        PipelineStep::LoadConfig,
        PipelineStep::OpenTunnel,
        PipelineStep::Deprovision,
        PipelineStep::ReleaseTunnel,
    ];

    /// 1-based 步骤编号（`run` 中的位置；deprovision 占用 provision 的位置）
    pub fn number(&self) -> usize {
        match self {
            PipelineStep::LoadConfig => 1,
            PipelineStep::CopyArtifact => 2,
            PipelineStep::Bootstrap => 3,
            PipelineStep::StartService => 4,
            PipelineStep::OpenTunnel => 5,
            PipelineStep::Provision | PipelineStep::Deprovision => 6,
            PipelineStep::AwaitReady => 7,
            PipelineStep::PersistEndpoint => 8,
            PipelineStep::RunWorkload => 9,
            PipelineStep::ReleaseTunnel => 10,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::LoadConfig => "load_config",
            PipelineStep::CopyArtifact => "copy_artifact",
            PipelineStep::Bootstrap => "bootstrap",
            PipelineStep::StartService => "start_service",
            PipelineStep::OpenTunnel => "open_tunnel",
            PipelineStep::Provision => "provision",
            PipelineStep::AwaitReady => "await_ready",
            PipelineStep::PersistEndpoint => "persist_endpoint",
            PipelineStep::RunWorkload => "run_workload",
            PipelineStep::ReleaseTunnel => "release_tunnel",
            PipelineStep::Deprovision => "deprovision",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PipelineStep::LoadConfig => "Load configuration",
            PipelineStep::CopyArtifact => "Copy florago binary",
            PipelineStep::Bootstrap => "Initialize florago",
            PipelineStep::StartService => "Start florago API server",
            PipelineStep::OpenTunnel => "Open SSH tunnel",
            PipelineStep::Provision => "Spin up Flower stack",
            PipelineStep::AwaitReady => "Wait for stack",
            PipelineStep::PersistEndpoint => "Update federation address",
            PipelineStep::RunWorkload => "Run flwr",
            PipelineStep::ReleaseTunnel => "Close SSH tunnel",
            PipelineStep::Deprovision => "Tear down Flower stack",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

/// 阶段状态
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    /// 失败但不影响流水线（警告）
    Degraded,
    Skipped,
}

/// 单个阶段的执行记录
#[derive(Clone, Debug, Serialize)]
pub struct Stage {
    pub step: PipelineStep,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    pub message: Option<String>,
}

impl Stage {
    pub fn new(step: PipelineStep) -> Self {
        Self {
            step,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    pub fn finish(&mut self, status: StageStatus, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = status;
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StageStatus::Skipped;
        self.message = reason;
    }
}

/// 流水线终态
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineOutcome {
    Success,
    /// 远端已有 stack 在运行
    StackAlreadyActive,
    /// 在某一步失败
    Failed { step: PipelineStep, reason: String },
    Cancelled,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Success)
    }

    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// 一次流水线运行（不持久化）
#[derive(Clone, Debug)]
pub struct PipelineRun {
    pub run_id: String,
    pub remote_host: Option<RemoteHost>,
    pub stages: Vec<Stage>,
    pub job_id: Option<String>,
    pub endpoint: Option<ControlEndpoint>,
    pub outcome: Option<PipelineOutcome>,
}

impl PipelineRun {
    pub fn new(steps: &[PipelineStep]) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            remote_host: None,
            stages: steps.iter().copied().map(Stage::new).collect(),
            job_id: None,
            endpoint: None,
            outcome: None,
        }
    }

    pub fn stage(&self, step: PipelineStep) -> Option<&Stage> {
        self.stages.iter().find(|s| s.step == step)
    }

    pub fn stage_mut(&mut self, step: PipelineStep) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|s| s.step == step)
    }

    /// 把仍处于 pending 的阶段标记为 skipped
    pub fn skip_remaining(&mut self, reason: &str) {
        for stage in &mut self.stages {
            if stage.status == StageStatus::Pending {
                stage.skip(Some(reason.to_string()));
            }
        }
    }

    pub fn outcome(&self) -> PipelineOutcome {
        self.outcome.clone().unwrap_or(PipelineOutcome::Cancelled)
    }
}
