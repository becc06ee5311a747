//! florago 控制平面 HTTP Client
//!
//! 封装与远端 florago API server 的所有 HTTP 交互（经由隧道的本地端点，
//! 或直连模式下的 `FLORAGO_API_URL`），复用连接池。
//!
//! 不做内部重试：是否重试由调用方（就绪轮询）决定。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::env::constants::{
    DEPROVISION_TIMEOUT_SECS, HEALTH_TIMEOUT_SECS, MONITORING_TIMEOUT_SECS,
    PROVISION_TIMEOUT_SECS, STATUS_TIMEOUT_SECS,
};
use crate::domain::stack::{
    HealthReport, MonitoringReport, SpinOutcome, SpinRequest, SpinResponse, StackSnapshot,
    StackState,
};
use crate::error::ControlError;

/// 结构化的 "已在运行" 错误码
const ALREADY_RUNNING_CODE: &str = "already_running";

/// 控制平面接口
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// POST /api/spin
    async fn provision(&self, request: &SpinRequest) -> Result<SpinOutcome, ControlError>;

    /// GET /api/spin
    async fn get_status(&self) -> Result<StackSnapshot, ControlError>;

    /// DELETE /api/spin，返回被取消的 job id
    async fn deprovision(&self) -> Result<String, ControlError>;

    /// GET /api/monitoring
    async fn monitoring(&self) -> Result<MonitoringReport, ControlError>;

    /// GET /health
    async fn health(&self) -> Result<HealthReport, ControlError>;
}

/// 根据 base URL 创建控制平面客户端
///
/// 隧道打开之后才知道本地端点，所以流水线持有 connector 而不是 client
pub trait ControlPlaneConnector: Send + Sync {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn ControlPlane>, ControlError>;
}

/// 基于 reqwest 的 connector
#[derive(Clone, Debug, Default)]
pub struct HttpConnector;

impl ControlPlaneConnector for HttpConnector {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn ControlPlane>, ControlError> {
        Ok(Arc::new(HttpControlPlane::new(base_url)?))
    }
}

/// GET /api/spin 响应体
#[derive(Debug, Default, Deserialize)]
struct StatusBody {
    #[serde(default)]
    job_id: String,
    #[serde(default)]
    state: Option<StackState>,
}

/// florago HTTP 客户端
#[derive(Clone, Debug)]
pub struct HttpControlPlane {
    client: Client,
    base_url: String,
}

impl HttpControlPlane {
    /// 创建新的客户端
    ///
    /// # Arguments
    /// * `base_url` - 例如 `http://localhost:8080`
    pub fn new(base_url: &str) -> Result<Self, ControlError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ControlError::Request {
                url: base_url.clone(),
                source: e,
            })?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 发送请求并读取状态码与响应体
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&SpinRequest>,
        timeout: Duration,
    ) -> Result<(String, StatusCode, String), ControlError> {
        let url = self.url(path);
        let mut request = self.client.request(method.clone(), &url).timeout(timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| ControlError::Request {
            url: url.clone(),
            source: e,
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| ControlError::Request {
            url: url.clone(),
            source: e,
        })?;

        debug!(method = %method, url = %url, status = %status, "Control plane responded");
        Ok((url, status, text))
    }

    /// GET 并解析 JSON；非成功状态码视为 `ControlError::Status`
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<T, ControlError> {
        let (url, status, text) = self.send(Method::GET, path, None, timeout).await?;
        if !status.is_success() {
            return Err(ControlError::Status {
                url,
                status: status.as_u16(),
                body: text,
            });
        }
        decode(&url, &text)
    }
}

fn decode<T: DeserializeOwned>(url: &str, text: &str) -> Result<T, ControlError> {
    serde_json::from_str(text).map_err(|e| ControlError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// 旧版 florago 只在 message 里说明冲突
fn mentions_already_running(message: &str) -> bool {
    message.to_lowercase().contains("already running")
}

fn rejection_message(response: &SpinResponse, status: StatusCode) -> String {
    if response.message.trim().is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        response.message.clone()
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn provision(&self, request: &SpinRequest) -> Result<SpinOutcome, ControlError> {
        if request.num_nodes == 0 {
            return Err(ControlError::InvalidRequest(
                "num_nodes must be at least 1".to_string(),
            ));
        }

        info!(
            num_nodes = request.num_nodes,
            partition = ?request.partition,
            "Requesting Flower stack"
        );

        let (url, status, text) = self
            .send(
                Method::POST,
                "/api/spin",
                Some(request),
                Duration::from_secs(PROVISION_TIMEOUT_SECS),
            )
            .await?;

        let parsed = serde_json::from_str::<SpinResponse>(&text);

        if status == StatusCode::CONFLICT {
            let message = parsed
                .ok()
                .map(|r| r.message)
                .filter(|m| !m.is_empty())
                .unwrap_or(text);
            return Err(ControlError::AlreadyRunning(message));
        }

        let response = match parsed {
            Ok(response) => response,
            Err(e) if status.is_success() => {
                return Err(ControlError::Decode {
                    url,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ControlError::Status {
                    url,
                    status: status.as_u16(),
                    body: text,
                })
            }
        };

        let failed = !response.success || !status.is_success();
        if failed {
            if response.code.as_deref() == Some(ALREADY_RUNNING_CODE)
                || mentions_already_running(&response.message)
            {
                return Err(ControlError::AlreadyRunning(response.message));
            }
            return Err(ControlError::Rejected(rejection_message(&response, status)));
        }

        info!(job_id = %response.job_id, "Flower stack submitted");
        Ok(SpinOutcome {
            job_id: response.job_id,
            message: response.message,
            state: response.state,
        })
    }

    async fn get_status(&self) -> Result<StackSnapshot, ControlError> {
        let body: StatusBody = self
            .get_json("/api/spin", Duration::from_secs(STATUS_TIMEOUT_SECS))
            .await?;

        Ok(StackSnapshot {
            job_id: body.job_id,
            state: body.state.unwrap_or_default(),
        })
    }

    async fn deprovision(&self) -> Result<String, ControlError> {
        let (url, status, text) = self
            .send(
                Method::DELETE,
                "/api/spin",
                None,
                Duration::from_secs(DEPROVISION_TIMEOUT_SECS),
            )
            .await?;

        let parsed = serde_json::from_str::<SpinResponse>(&text);

        if status == StatusCode::NOT_FOUND {
            let message = parsed
                .ok()
                .map(|r| r.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "no Flower stack is running".to_string());
            return Err(ControlError::Rejected(message));
        }

        let response = match parsed {
            Ok(response) => response,
            Err(e) if status.is_success() => {
                return Err(ControlError::Decode {
                    url,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ControlError::Status {
                    url,
                    status: status.as_u16(),
                    body: text,
                })
            }
        };

        if !response.success || !status.is_success() {
            warn!(status = %status, message = %response.message, "Deprovision rejected");
            return Err(ControlError::Rejected(rejection_message(&response, status)));
        }

        info!(job_id = %response.job_id, "Flower stack cancelled");
        Ok(response.job_id)
    }

    async fn monitoring(&self) -> Result<MonitoringReport, ControlError> {
        self.get_json(
            "/api/monitoring",
            Duration::from_secs(MONITORING_TIMEOUT_SECS),
        )
        .await
    }

    async fn health(&self) -> Result<HealthReport, ControlError> {
        self.get_json("/health", Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .await
    }
}
