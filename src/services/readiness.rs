//! 就绪轮询
//!
//! 周期性查询 stack 状态，直到协调节点就绪并上报 control API 端口。
//! 单次查询失败只记录并重试；超过截止时间才失败。

use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::domain::stack::{ControlEndpoint, StackStatus};
use crate::error::PollError;
use crate::infra::control_plane::ControlPlane;

/// 每次轮询交给观察者的进度（仅供展示）
#[derive(Clone, Debug, PartialEq)]
pub struct PollProgress {
    pub attempt: u32,
    pub completed: u32,
    pub expected: u32,
    pub status: StackStatus,
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// 就绪轮询器
#[derive(Clone, Debug)]
pub struct ReadinessPoller {
    interval: Duration,
    endpoint_host: String,
}

impl ReadinessPoller {
    pub fn new(interval: Duration, endpoint_host: impl Into<String>) -> Self {
        Self {
            interval,
            endpoint_host: endpoint_host.into(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 等待 stack 就绪
    ///
    /// 单次查询也受剩余时间约束：最晚在 deadline 加一个轮询间隔内返回超时
    pub async fn await_ready<F>(
        &self,
        control: &dyn ControlPlane,
        deadline: Duration,
        mut observer: F,
    ) -> Result<ControlEndpoint, PollError>
    where
        F: FnMut(&PollProgress) + Send,
    {
        let started = Instant::now();
        let end = started + deadline;
        let mut attempt = 0;
        let mut last_error: Option<String> = None;

        loop {
            attempt += 1;
            let mut progress = PollProgress {
                attempt,
                completed: 0,
                expected: 0,
                status: StackStatus::Absent,
                error: None,
                elapsed: started.elapsed(),
            };

            let remaining = end.saturating_duration_since(Instant::now());
            let polled = match timeout(remaining, control.get_status()).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!(
                    "status request still pending after {:?} at the deadline",
                    remaining
                )),
            };

            match polled {
                Ok(snapshot) => {
                    let state = &snapshot.state;
                    progress.completed = state.completed_nodes;
                    progress.expected = state.expected();
                    progress.status = state.status;

                    if let Some(port) = state.ready_control_port() {
                        observer(&progress);
                        let endpoint = ControlEndpoint::new(self.endpoint_host.clone(), port);
                        info!(
                            job_id = %snapshot.job_id,
                            endpoint = %endpoint,
                            attempts = attempt,
                            "Flower stack ready"
                        );
                        return Ok(endpoint);
                    }

                    if state.status == StackStatus::Error {
                        last_error = Some(format!("stack {} reported status error", snapshot.job_id));
                    }
                    debug!(
                        attempt,
                        status = %state.status,
                        completed = progress.completed,
                        expected = progress.expected,
                        "Stack not ready yet"
                    );
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Status poll failed");
                    progress.error = Some(e.clone());
                    last_error = Some(e);
                }
            }

            observer(&progress);

            let now = Instant::now();
            if now >= end {
                return Err(PollError::Timeout {
                    waited: now - started,
                    last_error,
                });
            }
            sleep(self.interval.min(end - now)).await;
        }
    }
}
