//! 终端输出格式

use std::fmt::Write;

use crate::domain::pipeline::{PipelineOutcome, PipelineRun, StageStatus};
use crate::domain::stack::{HealthReport, MonitoringReport, SpinOutcome, StackSnapshot};
use crate::error::{ControlError, PipelineError};

const RULE_WIDTH: usize = 60;

fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

fn stage_icon(status: &StageStatus) -> &'static str {
    match status {
        StageStatus::Success => "✓",
        StageStatus::Failed => "✗",
        StageStatus::Degraded => "⚠",
        StageStatus::Skipped => "-",
        StageStatus::Pending | StageStatus::Running => "…",
    }
}

/// `✗ <classification>: <message>`
pub fn failure_line(error: &PipelineError) -> String {
    format!("✗ {}: {}", error.classification(), error)
}

/// 直连命令的控制平面错误
pub fn control_failure_line(error: &ControlError) -> String {
    let classification = match error {
        ControlError::AlreadyRunning(_) => "stack already active",
        _ => "control-plane",
    };
    format!("✗ {}: {}", classification, error)
}

/// 流水线结束后的阶段汇总
pub fn pipeline_summary(run: &PipelineRun) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule());
    if let Some(host) = &run.remote_host {
        let _ = writeln!(out, "Login node: {}", host);
    }
    if let Some(job_id) = &run.job_id {
        let _ = writeln!(out, "Job ID: {}", job_id);
    }
    if let Some(endpoint) = &run.endpoint {
        let _ = writeln!(out, "Federation address: {}", endpoint);
    }

    for stage in &run.stages {
        let _ = write!(
            out,
            "{} {:>2}. {}",
            stage_icon(&stage.status),
            stage.step.number(),
            stage.step.display_name()
        );
        if let Some(ms) = stage.duration_ms {
            let _ = write!(out, " ({:.1}s)", ms as f64 / 1000.0);
        }
        if let Some(message) = &stage.message {
            let _ = write!(out, " - {}", message);
        }
        out.push('\n');
    }

    let verdict = match run.outcome() {
        PipelineOutcome::Success => "✓ Done".to_string(),
        PipelineOutcome::StackAlreadyActive => {
            "✗ A Flower stack is already running. Run `floralab stop` first.".to_string()
        }
        PipelineOutcome::Failed { step, .. } => format!("✗ Failed at step {}", step),
        PipelineOutcome::Cancelled => "✗ Cancelled".to_string(),
    };
    let _ = writeln!(out, "{}", rule());
    let _ = writeln!(out, "{}", verdict);
    out
}

/// `spin` 的结果
pub fn spin_outcome(outcome: &SpinOutcome) -> String {
    let mut out = format!("✓ Flower stack job submitted: {}\n", outcome.job_id);
    let _ = writeln!(out, "  Message: {}", outcome.message);
    if let Some(state) = &outcome.state {
        let _ = writeln!(out, "  Status: {}", state.status);
        let _ = writeln!(out, "  Expected nodes: {}", state.expected());
    }
    out
}

/// `status` 输出
pub fn stack_status(snapshot: &StackSnapshot, verbose: bool) -> String {
    let state = &snapshot.state;
    let job_id = if snapshot.job_id.is_empty() {
        "N/A"
    } else {
        snapshot.job_id.as_str()
    };

    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule());
    let _ = writeln!(out, "Job ID: {}", job_id);
    let _ = writeln!(out, "Status: {}", state.status);
    let _ = writeln!(out, "Expected Nodes: {}", state.expected());
    let _ = writeln!(out, "Completed Nodes: {}", state.completed_nodes);

    if let Some(server) = &state.server_node {
        let _ = writeln!(out, "\n🖥️  Server Node:");
        let _ = writeln!(out, "   IP: {}", server.ip);
        let _ = writeln!(out, "   Status: {}", server.status);
        if verbose {
            let _ = writeln!(out, "   Fleet API Port: {}", port_or_na(server.fleet_api_port));
            let _ = writeln!(out, "   Control API Port: {}", port_or_na(server.control_api_port));
            let _ = writeln!(
                out,
                "   ServerAppIO API Port: {}",
                port_or_na(server.server_app_io_api_port)
            );
        }
    }

    if !state.client_nodes.is_empty() {
        let _ = writeln!(out, "\n💻 Client Nodes ({}):", state.client_nodes.len());
        let mut ids: Vec<_> = state.client_nodes.keys().collect();
        ids.sort();
        for id in ids {
            let client = &state.client_nodes[id];
            let _ = write!(out, "   {}: {} [{}]", id, client.ip, client.status);
            if verbose {
                let _ = write!(out, " ClientAppIO {}", port_or_na(client.client_app_io_api_port));
            }
            out.push('\n');
        }
    }
    let _ = writeln!(out, "{}", rule());
    out
}

/// `monitoring` 输出
pub fn monitoring(report: &MonitoringReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule());
    let _ = writeln!(out, "Timestamp: {}", report.timestamp);

    if let Some(flower) = &report.flower_stack {
        let _ = writeln!(out, "\n🌸 Flower Stack:");
        let _ = writeln!(out, "   Status: {}", flower.status);
        let _ = writeln!(
            out,
            "   Job ID: {}",
            if flower.job_id.is_empty() { "N/A" } else { &flower.job_id }
        );
        let _ = writeln!(out, "   Nodes: {}/{}", flower.completed_nodes, flower.expected());
    }

    if let Some(slurm) = &report.slurm_info {
        let _ = writeln!(out, "\n⚡ SLURM Cluster:");
        if let Some(user) = slurm.user.as_deref().filter(|s| !s.is_empty()) {
            let _ = writeln!(out, "   User: {}", user);
        }
        if let Some(jobs) = slurm.jobs.as_deref().filter(|s| !s.trim().is_empty()) {
            let _ = writeln!(out, "\n   Jobs:\n{}", indent(jobs));
        }
        if let Some(nodes) = slurm.nodes.as_deref().filter(|s| !s.trim().is_empty()) {
            let _ = writeln!(out, "\n   Nodes:\n{}", indent(nodes));
        }
    }
    let _ = writeln!(out, "{}", rule());
    out
}

/// `health` 输出
pub fn health(report: &HealthReport) -> String {
    format!(
        "✓ API server is healthy\n  Status: {}\n  Timestamp: {}\n",
        report.status, report.timestamp
    )
}

fn port_or_na(port: Option<u16>) -> String {
    port.map(|p| p.to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn indent(text: &str) -> String {
    text.trim_end()
        .lines()
        .map(|line| format!("   {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}
