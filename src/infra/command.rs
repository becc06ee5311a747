//! 命令执行器
//!
//! 提供统一的本地子进程执行接口，支持：
//! - 超时控制（超时与非零退出区分）
//! - 取消时自动杀死子进程（kill_on_drop）
//! - stdout/stderr 分离捕获

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed(std::io::Error),
    /// 命令超时
    Timeout,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed(e) => write!(f, "Failed to spawn command: {}", e),
            CommandError::Timeout => write!(f, "Command timed out"),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(e) => Some(e),
            CommandError::Timeout => None,
        }
    }
}

/// 捕获的命令输出
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedOutput {
    /// 退出码（被信号终止时为 -1）
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl CommandRunner {
    /// 执行命令并捕获输出
    ///
    /// 超时后子进程随 future 一起被丢弃并杀死
    pub async fn run_captured(
        program: &str,
        args: &[String],
        work_dir: Option<&Path>,
        timeout: Duration,
    ) -> Result<CapturedOutput, CommandError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = work_dir {
            command.current_dir(dir);
        }

        debug!(program = %program, args = ?args, timeout = ?timeout, "Running command");

        let child = command.spawn().map_err(CommandError::SpawnFailed)?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CapturedOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(CommandError::SpawnFailed(e)),
            Err(_) => {
                warn!(program = %program, timeout = ?timeout, "Command timed out, killing process");
                Err(CommandError::Timeout)
            }
        }
    }

    /// 执行命令，继承当前终端的 stdin/stdout/stderr
    ///
    /// 用于交互式的 workload（例如 `flwr run`）；被信号终止时退出码为 `None`
    pub async fn run_inherited(
        program: &str,
        args: &[String],
        work_dir: &Path,
    ) -> Result<Option<i32>, CommandError> {
        let status = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(CommandError::SpawnFailed)?;

        Ok(status.code())
    }
}
