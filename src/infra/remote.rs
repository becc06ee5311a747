//! 远程传输客户端（ssh / scp）
//!
//! 假定登录节点已配置好基于密钥的信任关系，这里不处理任何凭据。
//! 退出码和输出原样返回，是否致命由调用方（流水线）判断。

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::env::constants::BACKGROUND_START_TIMEOUT_SECS;
use crate::config::RuntimeSettings;
use crate::domain::tunnel::RemoteHost;
use crate::error::TransportError;
use crate::infra::command::{CapturedOutput, CommandError, CommandRunner};

/// 远程命令输出
pub type RemoteOutput = CapturedOutput;

impl RemoteOutput {
    /// 非零退出转换为 `TransportError::NonZeroExit`
    pub fn into_checked(self, command: &str) -> Result<RemoteOutput, TransportError> {
        if self.success() {
            Ok(self)
        } else {
            Err(TransportError::NonZeroExit {
                command: command.to_string(),
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    /// stdout + stderr 中是否包含任一标记（忽略大小写）
    pub fn mentions_any(&self, markers: &[&str]) -> bool {
        let stdout = self.stdout.to_lowercase();
        let stderr = self.stderr.to_lowercase();
        markers.iter().any(|m| {
            let m = m.to_lowercase();
            stdout.contains(&m) || stderr.contains(&m)
        })
    }
}

/// 远程传输接口
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// 拷贝本地文件到远端
    async fn copy(
        &self,
        local_path: &Path,
        host: &RemoteHost,
        remote_path: &str,
    ) -> Result<(), TransportError>;

    /// 执行远程命令，返回退出码和输出
    async fn run_remote(
        &self,
        host: &RemoteHost,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteOutput, TransportError>;

    /// 在远端后台启动命令，输出重定向到远端日志文件
    async fn run_remote_background(
        &self,
        host: &RemoteHost,
        command: &str,
        log_path: &str,
    ) -> Result<(), TransportError>;
}

/// 基于 OpenSSH 命令行的实现
#[derive(Clone, Debug)]
pub struct SshTransport {
    ssh_program: String,
    scp_program: String,
    options: Vec<String>,
    copy_timeout: Duration,
}

impl SshTransport {
    pub fn new(settings: &RuntimeSettings, copy_timeout: Duration) -> Self {
        let mut options = vec![
            "BatchMode=yes".to_string(),
            format!("ConnectTimeout={}", settings.ssh_connect_timeout_secs),
        ];
        options.extend(settings.ssh_options.iter().cloned());

        Self {
            ssh_program: settings.ssh_program.clone(),
            scp_program: settings.scp_program.clone(),
            options,
            copy_timeout,
        }
    }

    fn option_args(&self) -> Vec<String> {
        self.options
            .iter()
            .flat_map(|o| ["-o".to_string(), o.clone()])
            .collect()
    }

    /// `ssh [-o ...] <host> <command>` 的参数
    pub fn ssh_args(&self, host: &RemoteHost, command: &str) -> Vec<String> {
        let mut args = self.option_args();
        args.push(host.as_str().to_string());
        args.push(command.to_string());
        args
    }

    /// `scp [-o ...] <local> <host>:<remote>` 的参数
    pub fn scp_args(&self, local_path: &Path, host: &RemoteHost, remote_path: &str) -> Vec<String> {
        let mut args = self.option_args();
        args.push(local_path.to_string_lossy().into_owned());
        args.push(format!("{}:{}", host, remote_path));
        args
    }

    fn map_command_error(program: &str, command: &str, timeout: Duration, e: CommandError) -> TransportError {
        match e {
            CommandError::SpawnFailed(source) => TransportError::Spawn {
                program: program.to_string(),
                source,
            },
            CommandError::Timeout => TransportError::Timeout {
                command: command.to_string(),
                after: timeout,
            },
        }
    }
}

/// 后台启动的 shell 包装：创建日志目录，nohup，重定向输出
pub fn background_command(command: &str, log_path: &str) -> String {
    let log_dir = match log_path.rfind('/') {
        Some(idx) if idx > 0 => &log_path[..idx],
        _ => ".",
    };
    format!(
        "mkdir -p {} && nohup {} > {} 2>&1 < /dev/null &",
        log_dir, command, log_path
    )
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn copy(
        &self,
        local_path: &Path,
        host: &RemoteHost,
        remote_path: &str,
    ) -> Result<(), TransportError> {
        if !local_path.is_file() {
            return Err(TransportError::MissingArtifact(local_path.to_path_buf()));
        }

        let destination = format!("{}:{}", host, remote_path);
        let args = self.scp_args(local_path, host, remote_path);
        info!(local = %local_path.display(), destination = %destination, "Copying artifact");

        let output = CommandRunner::run_captured(&self.scp_program, &args, None, self.copy_timeout)
            .await
            .map_err(|e| {
                Self::map_command_error(&self.scp_program, &destination, self.copy_timeout, e)
            })?;

        if output.success() {
            Ok(())
        } else {
            Err(TransportError::CopyFailed {
                destination,
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    async fn run_remote(
        &self,
        host: &RemoteHost,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteOutput, TransportError> {
        let args = self.ssh_args(host, command);
        let output = CommandRunner::run_captured(&self.ssh_program, &args, None, timeout)
            .await
            .map_err(|e| Self::map_command_error(&self.ssh_program, command, timeout, e))?;

        debug!(
            host = %host,
            command = %command,
            exit_code = output.exit_code,
            "Remote command finished"
        );
        Ok(output)
    }

    async fn run_remote_background(
        &self,
        host: &RemoteHost,
        command: &str,
        log_path: &str,
    ) -> Result<(), TransportError> {
        let wrapped = background_command(command, log_path);
        let timeout = Duration::from_secs(BACKGROUND_START_TIMEOUT_SECS);
        self.run_remote(host, &wrapped, timeout)
            .await?
            .into_checked(command)
            .map(|_| ())
    }
}
