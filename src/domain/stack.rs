//! Flower stack 相关领域模型
//!
//! 对应 florago API 的 JSON 契约，纯数据类型

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Stack 状态
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum StackStatus {
    /// 没有 stack（或已停止）
    #[default]
    Absent,
    Pending,
    Running,
    Error,
}

impl From<String> for StackStatus {
    fn from(s: String) -> Self {
        Self::from_wire(&s)
    }
}

impl StackStatus {
    /// 解析 florago 上报的状态字符串
    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "running" => StackStatus::Running,
            "failed" | "error" => StackStatus::Error,
            "" | "absent" | "stopping" | "stopped" => StackStatus::Absent,
            // pending, starting and anything newer
            _ => StackStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StackStatus::Absent => "absent",
            StackStatus::Pending => "pending",
            StackStatus::Running => "running",
            StackStatus::Error => "error",
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 节点状态
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum NodeStatus {
    #[default]
    Pending,
    Ready,
    Failed,
}

impl From<String> for NodeStatus {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ready" => NodeStatus::Ready,
            "failed" | "error" => NodeStatus::Failed,
            _ => NodeStatus::Pending,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Ready => "ready",
            NodeStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 节点信息（server 和 client 节点共用）
///
/// 端口为 0 视为未上报
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeInfo {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default, deserialize_with = "port", skip_serializing_if = "Option::is_none")]
    pub control_api_port: Option<u16>,
    #[serde(default, deserialize_with = "port", skip_serializing_if = "Option::is_none")]
    pub fleet_api_port: Option<u16>,
    #[serde(default, deserialize_with = "port", skip_serializing_if = "Option::is_none")]
    pub server_app_io_api_port: Option<u16>,
    #[serde(default, deserialize_with = "port", skip_serializing_if = "Option::is_none")]
    pub client_app_io_api_port: Option<u16>,
    #[serde(default)]
    pub status: NodeStatus,
}

fn port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<u32>::deserialize(deserializer)?;
    Ok(raw.and_then(|p| u16::try_from(p).ok()).filter(|p| *p > 0))
}

impl NodeInfo {
    pub fn is_ready(&self) -> bool {
        self.status == NodeStatus::Ready
    }
}

/// Stack 状态快照，只由远端修改
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StackState {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub status: StackStatus,
    #[serde(default)]
    pub num_nodes: u32,
    #[serde(default)]
    pub expected_nodes: u32,
    #[serde(default)]
    pub completed_nodes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_node: Option<NodeInfo>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub client_nodes: HashMap<String, NodeInfo>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, NodeInfo>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

impl StackState {
    /// 预期节点数；远端未上报时按 1 server + N client 计算
    pub fn expected(&self) -> u32 {
        if self.expected_nodes > 0 {
            self.expected_nodes
        } else {
            self.num_nodes + 1
        }
    }

    /// 协调节点就绪且上报了 control API 端口时返回该端口
    pub fn ready_control_port(&self) -> Option<u16> {
        if self.status != StackStatus::Running {
            return None;
        }
        let server = self.server_node.as_ref()?;
        if !server.is_ready() {
            return None;
        }
        server.control_api_port
    }
}

/// 协调节点的控制端点
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlEndpoint {
    pub host: String,
    pub port: u16,
}

impl ControlEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ControlEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// POST /api/spin 请求体
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SpinRequest {
    pub num_nodes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<String>,
}

impl SpinRequest {
    pub fn new(num_nodes: u32) -> Self {
        Self {
            num_nodes,
            partition: None,
            memory: None,
            time_limit: None,
        }
    }
}

/// /api/spin 的通用响应体（POST / DELETE，以及旧版 GET）
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SpinResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub state: Option<StackState>,
    /// 结构化错误码（新版 florago），例如 "already_running"
    #[serde(default)]
    pub code: Option<String>,
}

/// provision 成功结果
#[derive(Clone, Debug)]
pub struct SpinOutcome {
    pub job_id: String,
    pub message: String,
    pub state: Option<StackState>,
}

/// GET /api/spin 结果
#[derive(Clone, Debug, Default)]
pub struct StackSnapshot {
    pub job_id: String,
    pub state: StackState,
}

/// GET /api/monitoring 响应
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MonitoringReport {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub flower_stack: Option<StackState>,
    #[serde(default)]
    pub slurm_info: Option<SlurmInfo>,
}

/// SLURM 集群信息（squeue / sinfo 原始输出）
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SlurmInfo {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub jobs: Option<String>,
    #[serde(default)]
    pub nodes: Option<String>,
    #[serde(default)]
    pub current_job_detail: Option<String>,
}

/// GET /health 响应
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HealthReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timestamp: String,
}
