//! 配置模块
//!
//! 环境变量运行时设置与 pyproject.toml 项目配置

pub mod env;
pub mod project;

pub use env::RuntimeSettings;
pub use project::{ConfigStore, FederationConfig, InitReport, LocalConfig, PyprojectStore};
