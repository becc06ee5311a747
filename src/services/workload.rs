//! Federated workload launcher (`flwr run <federation> .`)

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::error::WorkloadError;
use crate::infra::command::{CommandError, CommandRunner};

#[async_trait]
pub trait WorkloadRunner: Send + Sync {
    /// Run the workload against `federation` from `project_dir`, streaming to the terminal.
    async fn run(&self, federation: &str, project_dir: &Path) -> Result<(), WorkloadError>;
}

#[derive(Clone, Debug)]
pub struct FlwrRunner {
    program: String,
}

impl FlwrRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(federation: &str) -> Vec<String> {
        vec!["run".to_string(), federation.to_string(), ".".to_string()]
    }
}

impl Default for FlwrRunner {
    fn default() -> Self {
        Self::new("flwr")
    }
}

#[async_trait]
impl WorkloadRunner for FlwrRunner {
    async fn run(&self, federation: &str, project_dir: &Path) -> Result<(), WorkloadError> {
        let args = Self::args(federation);
        info!(
            program = %self.program,
            federation = %federation,
            dir = %project_dir.display(),
            "Starting federated workload"
        );

        match CommandRunner::run_inherited(&self.program, &args, project_dir).await {
            Ok(Some(0)) => Ok(()),
            Ok(Some(code)) => Err(WorkloadError::NonZeroExit {
                program: self.program.clone(),
                code,
            }),
            Ok(None) | Err(CommandError::Timeout) => Err(WorkloadError::Terminated {
                program: self.program.clone(),
            }),
            Err(CommandError::SpawnFailed(source)) => Err(WorkloadError::Spawn {
                program: self.program.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        assert_eq!(FlwrRunner::args("floralab"), vec!["run", "floralab", "."]);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = FlwrRunner::new("nonexistent_flwr_12345");
        let dir = tempfile::TempDir::new().unwrap();
        let err = runner.run("floralab", dir.path()).await.unwrap_err();
        assert!(matches!(err, WorkloadError::Spawn { .. }));
        assert!(err.to_string().contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit() {
        // `false run floralab .` exits 1
        let runner = FlwrRunner::new("false");
        let dir = tempfile::TempDir::new().unwrap();
        let err = runner.run("floralab", dir.path()).await.unwrap_err();
        assert!(matches!(err, WorkloadError::NonZeroExit { code: 1, .. }));
    }
}
