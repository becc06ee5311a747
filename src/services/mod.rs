//! 服务层模块
//!
//! 包含核心业务逻辑：隧道管理、就绪轮询、workload 启动与流水线编排

pub mod pipeline;
pub mod readiness;
pub mod tunnel;
pub mod workload;

pub use pipeline::{Collaborators, Orchestrator, PipelineReport, ProbePolicy, RunOptions};
pub use readiness::{PollProgress, ReadinessPoller};
pub use tunnel::{SshTunnelManager, TunnelManager};
pub use workload::{FlwrRunner, WorkloadRunner};
