//! 统一错误处理
//!
//! 每个组件一个错误枚举，`PipelineError` 按步骤包装它们，并为 CLI 提供简短的分类标签

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::domain::pipeline::PipelineStep;

/// 远程传输错误（scp / ssh）
#[derive(Debug, Error)]
pub enum TransportError {
    /// 本地制品不存在
    #[error("artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// 无法启动 ssh/scp 进程
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// 命令超时（区别于非零退出）
    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    /// 远程命令非零退出
    #[error("`{command}` exited with code {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// 拷贝失败
    #[error("copy to {destination} failed (exit code {code}): {stderr}")]
    CopyFailed {
        destination: String,
        code: i32,
        stderr: String,
    },
}

/// 隧道错误
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to spawn tunnel process `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// 转发进程在宽限期内退出
    #[error("tunnel process exited before becoming ready ({status}): {stderr_tail}")]
    ExitedEarly {
        status: ExitStatus,
        stderr_tail: String,
    },

    /// 同一本地端口已有活跃隧道
    #[error("local port {0} already has an active tunnel")]
    PortInUse(u16),

    #[error("failed to inspect tunnel process: {0}")]
    Inspect(#[source] std::io::Error),
}

/// 控制平面（florago API）错误
#[derive(Debug, Error)]
pub enum ControlError {
    /// 已有 stack 在运行
    #[error("a Flower stack is already running: {0}")]
    AlreadyRunning(String),

    /// 服务端明确拒绝（success=false）
    #[error("control plane rejected the request: {0}")]
    Rejected(String),

    /// 网络 / HTTP 层失败
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// 非成功状态码且响应体无法解析
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// 响应体解析失败
    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// 本地校验失败，请求未发送
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// workload（`flwr run`）错误
#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program} run` exited with code {code}")]
    NonZeroExit { program: String, code: i32 },

    /// 被信号终止，没有退出码
    #[error("`{program} run` was terminated by a signal")]
    Terminated { program: String },
}

/// 就绪等待错误
#[derive(Debug, Error)]
pub enum PollError {
    #[error("stack did not become ready within {waited:?}{}", last_error_suffix(.last_error))]
    Timeout {
        waited: Duration,
        last_error: Option<String>,
    },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {})", e),
        None => String::new(),
    }
}

/// 本地配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{} not found; run `floralab init <login-node>` first", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `[tool.floralab] login-node` 未配置
    #[error("login-node is not configured; run `floralab init <login-node>` first")]
    MissingLoginNode,

    /// 结构不符合预期（例如 `tool` 不是表）
    #[error("unexpected value at `{0}`: expected a table")]
    NotATable(String),
}

/// 流水线错误：记录失败的步骤和原因
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("step {step}: {source}")]
    Transport {
        step: PipelineStep,
        #[source]
        source: TransportError,
    },

    #[error("step {step}: {source}")]
    Tunnel {
        step: PipelineStep,
        #[source]
        source: TunnelError,
    },

    #[error("step {step}: {source}")]
    Control {
        step: PipelineStep,
        #[source]
        source: ControlError,
    },

    #[error("step {step}: {source}")]
    Poll {
        step: PipelineStep,
        #[source]
        source: PollError,
    },

    #[error("step {step}: workload failed: {source}")]
    Workload {
        step: PipelineStep,
        #[source]
        source: WorkloadError,
    },

    #[error("cancelled by user")]
    Cancelled,
}

impl PipelineError {
    /// 面向用户的错误分类
    pub fn classification(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::Transport { .. } => "transport",
            PipelineError::Tunnel { .. } => "tunnel",
            PipelineError::Control {
                source: ControlError::AlreadyRunning(_),
                ..
            } => "stack already active",
            PipelineError::Control { .. } => "control-plane",
            PipelineError::Poll { .. } => "timed out",
            PipelineError::Workload { .. } => "workload",
            PipelineError::Cancelled => "cancelled",
        }
    }

    /// 失败所在步骤（配置错误发生在第 1 步）
    pub fn step(&self) -> Option<PipelineStep> {
        match self {
            PipelineError::Config(_) => Some(PipelineStep::LoadConfig),
            PipelineError::Transport { step, .. }
            | PipelineError::Tunnel { step, .. }
            | PipelineError::Control { step, .. }
            | PipelineError::Poll { step, .. }
            | PipelineError::Workload { step, .. } => Some(*step),
            PipelineError::Cancelled => None,
        }
    }
}
