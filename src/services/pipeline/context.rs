//! 流水线执行上下文
//!
//! 记录每个步骤的阶段状态，并统一输出步骤日志

use tracing::{info, warn};

use crate::domain::pipeline::{PipelineOutcome, PipelineRun, PipelineStep, StageStatus};
use crate::error::{ControlError, PipelineError};

/// 流水线执行上下文
pub struct RunContext {
    /// 运行记录
    pub run: PipelineRun,
}

impl RunContext {
    pub fn new(steps: &[PipelineStep]) -> Self {
        Self {
            run: PipelineRun::new(steps),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    /// 开始一个步骤
    pub fn begin(&mut self, step: PipelineStep) {
        info!(run_id = %self.run.run_id, step = %step, "{}", step.display_name());
        if let Some(stage) = self.run.stage_mut(step) {
            stage.start();
        }
    }

    /// 步骤成功
    pub fn succeed(&mut self, step: PipelineStep, message: Option<String>) {
        if let Some(stage) = self.run.stage_mut(step) {
            stage.finish(StageStatus::Success, message);
        }
    }

    /// 步骤完成但有非致命问题
    pub fn degrade(&mut self, step: PipelineStep, message: String) {
        warn!(run_id = %self.run.run_id, step = %step, "{}", message);
        if let Some(stage) = self.run.stage_mut(step) {
            stage.finish(StageStatus::Degraded, Some(message));
        }
    }

    /// 跳过一个步骤
    pub fn skip(&mut self, step: PipelineStep, reason: &str) {
        if let Some(stage) = self.run.stage_mut(step) {
            stage.skip(Some(reason.to_string()));
        }
    }

    /// 结束运行：仍在执行的阶段记为失败，未执行的记为跳过
    pub fn finish(mut self, result: &Result<(), PipelineError>) -> PipelineRun {
        let outcome = match result {
            Ok(()) => PipelineOutcome::Success,
            Err(PipelineError::Cancelled) => PipelineOutcome::Cancelled,
            Err(PipelineError::Control {
                source: ControlError::AlreadyRunning(_),
                ..
            }) => PipelineOutcome::StackAlreadyActive,
            Err(e) => PipelineOutcome::Failed {
                step: e.step().unwrap_or(PipelineStep::LoadConfig),
                reason: e.to_string(),
            },
        };

        let failure = match result {
            Ok(()) => None,
            Err(PipelineError::Cancelled) => Some("cancelled".to_string()),
            Err(e) => Some(e.to_string()),
        };

        for stage in &mut self.run.stages {
            if stage.status == StageStatus::Running {
                stage.finish(StageStatus::Failed, failure.clone());
            }
        }
        let reason = match &outcome {
            PipelineOutcome::Success => "not required",
            PipelineOutcome::Cancelled => "cancelled",
            _ => "aborted after failure",
        };
        self.run.skip_remaining(reason);

        match &outcome {
            PipelineOutcome::Success => info!(run_id = %self.run.run_id, "Pipeline completed"),
            other => warn!(run_id = %self.run.run_id, outcome = ?other, "Pipeline did not complete"),
        }

        self.run.outcome = Some(outcome);
        self.run
    }
}
