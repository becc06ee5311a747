//! FloraLab - Flower 联邦学习 SLURM 部署工具
//!
//! 模块化的库入口：CLI 只负责参数解析和结果展示，流水线逻辑都在这里

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

pub use config::{ConfigStore, LocalConfig, PyprojectStore, RuntimeSettings};
pub use error::{
    ConfigError, ControlError, PipelineError, PollError, TransportError, TunnelError, WorkloadError,
};
pub use services::pipeline::{Collaborators, Orchestrator, PipelineReport, RunOptions};
