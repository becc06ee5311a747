//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// 运行时设置（来自环境变量，CLI 参数可覆盖）
#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    /// 直连模式下的 florago API 地址
    pub api_url: String,
    /// 本地 florago 二进制
    pub florago_binary: PathBuf,
    /// ssh 可执行文件
    pub ssh_program: String,
    /// scp 可执行文件
    pub scp_program: String,
    /// 额外的 `-o` 选项
    pub ssh_options: Vec<String>,
    /// ssh ConnectTimeout（秒）
    pub ssh_connect_timeout_secs: u64,
    /// 写入 federation address 的主机名
    pub endpoint_host: String,
    /// 就绪等待上限
    pub ready_timeout: Duration,
    /// 就绪轮询间隔
    pub poll_interval: Duration,
    /// 远端 florago API 端口
    pub remote_api_port: u16,
    /// flwr 可执行文件
    pub flwr_program: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            api_url: constants::DEFAULT_API_URL.to_string(),
            florago_binary: default_florago_binary(),
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            ssh_options: Vec::new(),
            ssh_connect_timeout_secs: constants::SSH_CONNECT_TIMEOUT_SECS,
            endpoint_host: "127.0.0.1".to_string(),
            ready_timeout: Duration::from_secs(constants::READY_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(constants::POLL_INTERVAL_SECS),
            remote_api_port: constants::REMOTE_API_PORT,
            flwr_program: "flwr".to_string(),
        }
    }
}

impl RuntimeSettings {
    /// 从环境变量加载
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_url = load_with_fallback("FLORAGO_API_URL", "FLORALAB_API_URL")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_url);

        let florago_binary = env::var("FLORALAB_FLORAGO_BINARY")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.florago_binary);

        let ssh_program = env::var("FLORALAB_SSH").unwrap_or(defaults.ssh_program);
        let scp_program = env::var("FLORALAB_SCP").unwrap_or(defaults.scp_program);

        let ssh_options = env::var("FLORALAB_SSH_OPTIONS")
            .map(|v| parse_ssh_options(&v))
            .unwrap_or_default();

        let ssh_connect_timeout_secs = parse_env("FLORALAB_SSH_CONNECT_TIMEOUT_SECS")
            .unwrap_or(defaults.ssh_connect_timeout_secs);

        let endpoint_host = env::var("FLORALAB_ENDPOINT_HOST")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.endpoint_host);

        let ready_timeout = parse_env("FLORALAB_READY_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.ready_timeout);

        let poll_interval = parse_env::<u64>("FLORALAB_POLL_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let remote_api_port =
            parse_env("FLORALAB_REMOTE_PORT").unwrap_or(defaults.remote_api_port);

        let flwr_program = env::var("FLORALAB_FLWR").unwrap_or(defaults.flwr_program);

        Self {
            api_url,
            florago_binary,
            ssh_program,
            scp_program,
            ssh_options,
            ssh_connect_timeout_secs,
            endpoint_host,
            ready_timeout,
            poll_interval,
            remote_api_port,
            flwr_program,
        }
    }
}

/// 默认制品位置：可执行文件旁的 `bin/florago-amd64`
fn default_florago_binary() -> PathBuf {
    if let Ok(exe_path) = env::current_exe() {
        if let Some(parent) = exe_path.parent() {
            return parent.join("bin").join(constants::FLORAGO_BINARY_NAME);
        }
    }
    PathBuf::from("bin").join(constants::FLORAGO_BINARY_NAME)
}

/// "StrictHostKeyChecking=no, ServerAliveInterval=30" -> ["StrictHostKeyChecking=no", ...]
fn parse_ssh_options(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring unparsable environment variable");
            None
        }
    }
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 常量
pub mod constants {
    /// 默认 florago API 地址
    pub const DEFAULT_API_URL: &str = "http://localhost:8080";

    /// 打包的 florago 二进制文件名
    pub const FLORAGO_BINARY_NAME: &str = "florago-amd64";

    /// 远端 florago 二进制路径
    pub const REMOTE_BINARY_PATH: &str = "~/florago";

    /// 远端 API server 日志
    pub const REMOTE_SERVER_LOG: &str = "~/.florago/logs/florago-server.log";

    /// 远端 florago API 端口
    pub const REMOTE_API_PORT: u16 = 8080;

    /// 本地隧道端口
    pub const LOCAL_TUNNEL_PORT: u16 = 8080;

    /// 默认 federation 名称
    pub const FEDERATION_NAME: &str = "floralab";

    /// init 之后 federation 的默认地址
    pub const DEFAULT_FEDERATION_ADDRESS: &str = "127.0.0.1:9093";

    /// `florago init` 超时（秒）
    pub const INIT_TIMEOUT_SECS: u64 = 300;

    /// scp 超时（秒）
    pub const COPY_TIMEOUT_SECS: u64 = 300;

    /// 普通远程命令超时（秒）
    pub const REMOTE_COMMAND_TIMEOUT_SECS: u64 = 30;

    /// 后台启动命令超时（秒）
    pub const BACKGROUND_START_TIMEOUT_SECS: u64 = 15;

    /// ssh ConnectTimeout（秒）
    pub const SSH_CONNECT_TIMEOUT_SECS: u64 = 10;

    /// 就绪等待上限（秒）
    pub const READY_TIMEOUT_SECS: u64 = 300;

    /// 就绪轮询间隔（秒）
    pub const POLL_INTERVAL_SECS: u64 = 5;

    /// 隧道建立宽限期（毫秒）
    pub const TUNNEL_GRACE_MS: u64 = 2000;

    /// 隧道探测间隔（毫秒）
    pub const TUNNEL_PROBE_INTERVAL_MS: u64 = 200;

    /// 端口探测生效前转发进程至少存活的时间（毫秒）
    pub const TUNNEL_SETTLE_MS: u64 = 500;

    /// 控制平面请求超时（秒）
    pub const PROVISION_TIMEOUT_SECS: u64 = 30;
    pub const STATUS_TIMEOUT_SECS: u64 = 10;
    pub const DEPROVISION_TIMEOUT_SECS: u64 = 10;
    pub const MONITORING_TIMEOUT_SECS: u64 = 10;
    pub const HEALTH_TIMEOUT_SECS: u64 = 5;

    /// API server 启动后的探测次数与间隔
    pub const SERVICE_PROBE_ATTEMPTS: u32 = 5;
    pub const SERVICE_PROBE_DELAY_MS: u64 = 1000;

    /// 远端进程探测次数
    pub const PROCESS_PROBE_ATTEMPTS: u32 = 3;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_fallback() {
        env::set_var("FLORALAB_TEST_PRIMARY", "primary_value");
        env::set_var("FLORALAB_TEST_FALLBACK", "fallback_value");

        assert_eq!(
            load_with_fallback("FLORALAB_TEST_PRIMARY", "FLORALAB_TEST_FALLBACK"),
            Some("primary_value".to_string())
        );

        env::remove_var("FLORALAB_TEST_PRIMARY");
        assert_eq!(
            load_with_fallback("FLORALAB_TEST_PRIMARY", "FLORALAB_TEST_FALLBACK"),
            Some("fallback_value".to_string())
        );

        env::remove_var("FLORALAB_TEST_FALLBACK");
        assert_eq!(
            load_with_fallback("FLORALAB_TEST_PRIMARY", "FLORALAB_TEST_FALLBACK"),
            None
        );
    }

    #[test]
    fn test_parse_ssh_options() {
        assert_eq!(
            parse_ssh_options("StrictHostKeyChecking=no, ServerAliveInterval=30,"),
            vec!["StrictHostKeyChecking=no", "ServerAliveInterval=30"]
        );
        assert!(parse_ssh_options("").is_empty());
    }

    #[test]
    fn test_parse_env_ignores_garbage() {
        env::set_var("FLORALAB_TEST_PORT", "not-a-port");
        assert_eq!(parse_env::<u16>("FLORALAB_TEST_PORT"), None);
        env::set_var("FLORALAB_TEST_PORT", " 9000 ");
        assert_eq!(parse_env::<u16>("FLORALAB_TEST_PORT"), Some(9000));
        env::remove_var("FLORALAB_TEST_PORT");
    }

    #[test]
    fn test_defaults() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.api_url, "http://localhost:8080");
        assert_eq!(settings.ready_timeout, Duration::from_secs(300));
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.endpoint_host, "127.0.0.1");
    }
}
