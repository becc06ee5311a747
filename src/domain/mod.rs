//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio/reqwest

pub mod pipeline;
pub mod stack;
pub mod tunnel;

// Re-exports for convenience
pub use pipeline::{PipelineOutcome, PipelineRun, PipelineStep, Stage, StageStatus};
pub use stack::{
    ControlEndpoint, HealthReport, MonitoringReport, NodeInfo, NodeStatus, SpinOutcome,
    SpinRequest, StackSnapshot, StackState, StackStatus,
};
pub use tunnel::{RemoteHost, TunnelHandle, TunnelSpec, TunnelState};
