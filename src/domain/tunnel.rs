//! 远程主机与 SSH 隧道相关领域模型
//!
//! 纯数据类型，无 tokio 依赖

use std::fmt;

use serde::Serialize;

use crate::error::ConfigError;

/// SLURM 登录节点（`host` 或 `user@host`）
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RemoteHost(String);

impl RemoteHost {
    /// 空字符串视为未配置
    pub fn new(host: impl AsRef<str>) -> Result<Self, ConfigError> {
        let host = host.as_ref().trim();
        if host.is_empty() {
            return Err(ConfigError::MissingLoginNode);
        }
        Ok(Self(host.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 隧道存活状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    /// 进程已启动，转发尚未确认
    Starting,
    Alive,
    Dead,
}

/// 一个本地 → 远程端口转发
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelSpec {
    pub host: RemoteHost,
    pub local_port: u16,
    pub remote_port: u16,
}

impl TunnelSpec {
    pub fn new(host: RemoteHost, local_port: u16, remote_port: u16) -> Self {
        Self {
            host,
            local_port,
            remote_port,
        }
    }

    /// `ssh -L` 参数
    pub fn forward_arg(&self) -> String {
        format!("{}:localhost:{}", self.local_port, self.remote_port)
    }

    /// 经隧道访问远端服务的 base URL
    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.local_port)
    }
}

/// 已打开隧道的句柄，由 TunnelManager 独占管理
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelHandle {
    pub id: u64,
    pub spec: TunnelSpec,
    pub pid: Option<u32>,
}

impl TunnelHandle {
    pub fn local_port(&self) -> u16 {
        self.spec.local_port
    }

    pub fn remote_port(&self) -> u16 {
        self.spec.remote_port
    }

    pub fn local_url(&self) -> String {
        self.spec.local_url()
    }
}
