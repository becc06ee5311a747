//! Orchestrator tests against in-memory collaborators.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use floralab::config::{ConfigStore, FederationConfig, LocalConfig};
use floralab::domain::{
    HealthReport, MonitoringReport, NodeInfo, NodeStatus, PipelineOutcome, PipelineStep,
    RemoteHost, SpinOutcome, SpinRequest, StackSnapshot, StackState, StackStatus, StageStatus,
    TunnelHandle, TunnelSpec,
};
use floralab::error::{
    ConfigError, ControlError, PipelineError, TransportError, TunnelError, WorkloadError,
};
use floralab::infra::control_plane::{ControlPlane, ControlPlaneConnector};
use floralab::infra::remote::{RemoteOutput, RemoteTransport};
use floralab::services::{
    Collaborators, Orchestrator, PipelineReport, ProbePolicy, RunOptions, TunnelManager,
    WorkloadRunner,
};

// ============================================================================
// Scripts
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
enum Provision {
    Accept,
    AlreadyRunning,
    Reject,
}

#[derive(Clone, Debug)]
struct Script {
    login_node: Option<String>,
    copy_fails: bool,
    init_exit: i32,
    init_stderr: String,
    background_fails: bool,
    pgrep_found: bool,
    tunnel_fails: bool,
    provision: Provision,
    statuses: Vec<StackSnapshot>,
    deprovision_fails: bool,
    persist_fails: bool,
    workload_fails: bool,
    workload_blocks: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            login_node: Some("alice@login01".to_string()),
            copy_fails: false,
            init_exit: 0,
            init_stderr: String::new(),
            background_fails: false,
            pgrep_found: true,
            tunnel_fails: false,
            provision: Provision::Accept,
            statuses: vec![pending(), ready(41000)],
            deprovision_fails: false,
            persist_fails: false,
            workload_fails: false,
            workload_blocks: false,
        }
    }
}

fn pending() -> StackSnapshot {
    StackSnapshot {
        job_id: "4242".to_string(),
        state: StackState {
            job_id: "4242".to_string(),
            status: StackStatus::Pending,
            num_nodes: 2,
            ..StackState::default()
        },
    }
}

fn ready(port: u16) -> StackSnapshot {
    StackSnapshot {
        job_id: "4242".to_string(),
        state: StackState {
            job_id: "4242".to_string(),
            status: StackStatus::Running,
            num_nodes: 2,
            completed_nodes: 3,
            server_node: Some(NodeInfo {
                node_id: "server".to_string(),
                ip: "10.0.0.5".to_string(),
                control_api_port: Some(port),
                status: NodeStatus::Ready,
                ..NodeInfo::default()
            }),
            ..StackState::default()
        },
    }
}

// ============================================================================
// Mocks
// ============================================================================

struct MockConfig {
    script: Script,
    dir: PathBuf,
    persisted: Mutex<Vec<String>>,
}

#[async_trait]
impl ConfigStore for MockConfig {
    async fn load(&self) -> Result<LocalConfig, ConfigError> {
        Ok(LocalConfig {
            login_node: self.script.login_node.clone(),
            federation: FederationConfig::default(),
        })
    }

    async fn set_federation_address(&self, address: &str) -> Result<(), ConfigError> {
        if self.script.persist_fails {
            return Err(ConfigError::NotATable("tool".to_string()));
        }
        self.persisted.lock().unwrap().push(address.to_string());
        Ok(())
    }

    fn project_dir(&self) -> &Path {
        &self.dir
    }

    fn federation(&self) -> &str {
        "floralab"
    }
}

struct MockTransport {
    script: Script,
    commands: Mutex<Vec<String>>,
}

impl MockTransport {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

fn output(exit_code: i32, stderr: &str) -> RemoteOutput {
    RemoteOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn copy(
        &self,
        local_path: &Path,
        _host: &RemoteHost,
        remote_path: &str,
    ) -> Result<(), TransportError> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("scp {} {}", local_path.display(), remote_path));
        if self.script.copy_fails {
            return Err(TransportError::MissingArtifact(local_path.to_path_buf()));
        }
        Ok(())
    }

    async fn run_remote(
        &self,
        _host: &RemoteHost,
        command: &str,
        _timeout: Duration,
    ) -> Result<RemoteOutput, TransportError> {
        self.commands.lock().unwrap().push(command.to_string());
        if command.ends_with(" init") {
            Ok(output(self.script.init_exit, &self.script.init_stderr))
        } else if command.starts_with("pgrep") {
            Ok(output(if self.script.pgrep_found { 0 } else { 1 }, ""))
        } else {
            Ok(output(0, ""))
        }
    }

    async fn run_remote_background(
        &self,
        _host: &RemoteHost,
        command: &str,
        log_path: &str,
    ) -> Result<(), TransportError> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("background {} > {}", command, log_path));
        if self.script.background_fails {
            return Err(TransportError::NonZeroExit {
                command: command.to_string(),
                code: 127,
                stderr: "nohup: not found".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct MockTunnels {
    fails: bool,
    next_id: AtomicU64,
    opened: AtomicU32,
    closed: Mutex<Vec<u64>>,
}

impl MockTunnels {
    fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    fn closed(&self) -> Vec<u64> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TunnelManager for MockTunnels {
    async fn open(
        &self,
        host: &RemoteHost,
        local_port: u16,
        remote_port: u16,
    ) -> Result<TunnelHandle, TunnelError> {
        if self.fails {
            return Err(TunnelError::PortInUse(local_port));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(TunnelHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            spec: TunnelSpec::new(host.clone(), local_port, remote_port),
            pid: Some(4000),
        })
    }

    async fn is_alive(&self, handle: &TunnelHandle) -> bool {
        !self.closed().contains(&handle.id)
    }

    async fn close(&self, handle: &TunnelHandle) {
        self.closed.lock().unwrap().push(handle.id);
    }
}

struct MockControl {
    script: Script,
    statuses: Mutex<VecDeque<StackSnapshot>>,
    provision_calls: AtomicU32,
    deprovision_calls: AtomicU32,
    connected_to: Mutex<Vec<String>>,
}

#[async_trait]
impl ControlPlane for MockControl {
    async fn provision(&self, request: &SpinRequest) -> Result<SpinOutcome, ControlError> {
        self.provision_calls.fetch_add(1, Ordering::SeqCst);
        match self.script.provision {
            Provision::Accept => Ok(SpinOutcome {
                job_id: "4242".to_string(),
                message: format!("submitted {} nodes", request.num_nodes),
                state: None,
            }),
            Provision::AlreadyRunning => Err(ControlError::AlreadyRunning(
                "A Flower stack is already running".to_string(),
            )),
            Provision::Reject => Err(ControlError::Rejected("sbatch failed".to_string())),
        }
    }

    async fn get_status(&self) -> Result<StackSnapshot, ControlError> {
        let mut statuses = self.statuses.lock().unwrap();
        let next = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        next.ok_or_else(|| ControlError::Rejected("no status scripted".to_string()))
    }

    async fn deprovision(&self) -> Result<String, ControlError> {
        self.deprovision_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.deprovision_fails {
            return Err(ControlError::Rejected("No Flower stack is running".to_string()));
        }
        Ok("4242".to_string())
    }

    async fn monitoring(&self) -> Result<MonitoringReport, ControlError> {
        Ok(MonitoringReport::default())
    }

    async fn health(&self) -> Result<HealthReport, ControlError> {
        Ok(HealthReport {
            status: "ok".to_string(),
            timestamp: String::new(),
        })
    }
}

struct Connector(Arc<MockControl>);

impl ControlPlaneConnector for Connector {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn ControlPlane>, ControlError> {
        self.0.connected_to.lock().unwrap().push(base_url.to_string());
        Ok(self.0.clone())
    }
}

struct MockWorkload {
    script: Script,
    calls: Mutex<Vec<(String, PathBuf)>>,
}

#[async_trait]
impl WorkloadRunner for MockWorkload {
    async fn run(&self, federation: &str, project_dir: &Path) -> Result<(), WorkloadError> {
        self.calls
            .lock()
            .unwrap()
            .push((federation.to_string(), project_dir.to_path_buf()));
        if self.script.workload_blocks {
            std::future::pending::<()>().await;
        }
        if self.script.workload_fails {
            return Err(WorkloadError::NonZeroExit {
                program: "flwr".to_string(),
                code: 2,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    config: Arc<MockConfig>,
    transport: Arc<MockTransport>,
    tunnels: Arc<MockTunnels>,
    control: Arc<MockControl>,
    workload: Arc<MockWorkload>,
    cancel_token: CancellationToken,
}

impl Harness {
    fn new(script: Script) -> Self {
        Self {
            config: Arc::new(MockConfig {
                script: script.clone(),
                dir: PathBuf::from("/work/quickstart"),
                persisted: Mutex::new(Vec::new()),
            }),
            transport: Arc::new(MockTransport {
                script: script.clone(),
                commands: Mutex::new(Vec::new()),
            }),
            tunnels: Arc::new(MockTunnels {
                fails: script.tunnel_fails,
                ..MockTunnels::default()
            }),
            control: Arc::new(MockControl {
                script: script.clone(),
                statuses: Mutex::new(script.statuses.clone().into()),
                provision_calls: AtomicU32::new(0),
                deprovision_calls: AtomicU32::new(0),
                connected_to: Mutex::new(Vec::new()),
            }),
            workload: Arc::new(MockWorkload {
                script,
                calls: Mutex::new(Vec::new()),
            }),
            cancel_token: CancellationToken::new(),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            Collaborators {
                config: self.config.clone(),
                transport: self.transport.clone(),
                tunnels: self.tunnels.clone(),
                control: Arc::new(Connector(self.control.clone())),
                workload: self.workload.clone(),
            },
            self.cancel_token.clone(),
        )
    }

    async fn run(&self) -> PipelineReport {
        self.orchestrator().run(&options()).await
    }

    async fn stop(&self) -> PipelineReport {
        self.orchestrator().stop(8080, 8080).await
    }

    /// every opened tunnel was closed exactly once
    fn assert_tunnels_balanced(&self) {
        let closed = self.tunnels.closed();
        assert_eq!(closed.len() as u32, self.tunnels.opened());
        let mut unique = closed.clone();
        unique.dedup();
        assert_eq!(unique.len(), closed.len());
    }
}

fn options() -> RunOptions {
    RunOptions {
        request: SpinRequest::new(2),
        artifact: PathBuf::from("/opt/floralab/bin/florago-amd64"),
        local_port: 8080,
        remote_port: 8080,
        ready_timeout: Duration::from_secs(60),
        poll_interval: Duration::from_secs(5),
        endpoint_host: "127.0.0.1".to_string(),
        service_probe: ProbePolicy {
            attempts: 5,
            delay: Duration::from_secs(1),
        },
        process_probe: ProbePolicy {
            attempts: 3,
            delay: Duration::from_secs(1),
        },
    }
}

fn stage_status(report: &PipelineReport, step: PipelineStep) -> StageStatus {
    report.run.stage(step).unwrap().status.clone()
}

// ============================================================================
// run
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_happy_path() {
    let h = Harness::new(Script::default());
    let report = h.run().await;

    assert_eq!(report.outcome(), PipelineOutcome::Success);
    assert_eq!(report.exit_code(), 0);
    assert!(report.error.is_none());
    for step in PipelineStep::RUN {
        assert_eq!(stage_status(&report, step), StageStatus::Success, "{}", step);
    }

    assert_eq!(
        h.transport.commands(),
        vec![
            "scp /opt/floralab/bin/florago-amd64 ~/florago".to_string(),
            "chmod +x ~/florago".to_string(),
            "~/florago init".to_string(),
            "background ~/florago start --host 0.0.0.0 --port 8080 > ~/.florago/logs/florago-server.log"
                .to_string(),
            "pgrep -f \"florago start\"".to_string(),
        ]
    );
    assert_eq!(
        h.control.connected_to.lock().unwrap().clone(),
        vec!["http://localhost:8080".to_string()]
    );
    assert_eq!(h.config.persisted.lock().unwrap().clone(), vec!["127.0.0.1:41000"]);
    assert_eq!(
        h.workload.calls.lock().unwrap().clone(),
        vec![("floralab".to_string(), PathBuf::from("/work/quickstart"))]
    );
    assert_eq!(report.run.job_id.as_deref(), Some("4242"));
    assert_eq!(report.run.endpoint.as_ref().unwrap().port, 41000);
    assert_eq!(h.tunnels.closed(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_tunnel_balance_across_failure_at_every_step() {
    let cases: Vec<(PipelineStep, Script)> = vec![
        (
            PipelineStep::LoadConfig,
            Script {
                login_node: None,
                ..Script::default()
            },
        ),
        (
            PipelineStep::CopyArtifact,
            Script {
                copy_fails: true,
                ..Script::default()
            },
        ),
        (
            PipelineStep::Bootstrap,
            Script {
                init_exit: 1,
                init_stderr: "permission denied".to_string(),
                ..Script::default()
            },
        ),
        (
            PipelineStep::OpenTunnel,
            Script {
                tunnel_fails: true,
                ..Script::default()
            },
        ),
        (
            PipelineStep::Provision,
            Script {
                provision: Provision::Reject,
                ..Script::default()
            },
        ),
        (
            PipelineStep::AwaitReady,
            Script {
                statuses: vec![pending()],
                ..Script::default()
            },
        ),
        (
            PipelineStep::RunWorkload,
            Script {
                workload_fails: true,
                ..Script::default()
            },
        ),
    ];

    for (failing, script) in cases {
        let h = Harness::new(script);
        let report = h.run().await;

        match report.outcome() {
            PipelineOutcome::Failed { step, .. } => assert_eq!(step, failing),
            other => panic!("step {}: unexpected outcome {:?}", failing, other),
        }
        assert_eq!(report.exit_code(), 1);
        assert_eq!(stage_status(&report, failing), StageStatus::Failed);
        h.assert_tunnels_balanced();

        let opened_before_failure = failing.number() > PipelineStep::OpenTunnel.number();
        assert_eq!(h.tunnels.opened(), u32::from(opened_before_failure), "{}", failing);
        let release = stage_status(&report, PipelineStep::ReleaseTunnel);
        if opened_before_failure {
            assert_eq!(release, StageStatus::Success);
        } else {
            assert_eq!(release, StageStatus::Skipped);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_failure_skips_later_steps() {
    let h = Harness::new(Script {
        copy_fails: true,
        ..Script::default()
    });
    let report = h.run().await;

    assert!(matches!(
        report.error,
        Some(PipelineError::Transport {
            step: PipelineStep::CopyArtifact,
            source: TransportError::MissingArtifact(_)
        })
    ));
    for step in [
        PipelineStep::Bootstrap,
        PipelineStep::StartService,
        PipelineStep::Provision,
        PipelineStep::RunWorkload,
    ] {
        assert_eq!(stage_status(&report, step), StageStatus::Skipped);
    }
    assert_eq!(h.control.provision_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_init_already_initialized_is_soft_success() {
    let h = Harness::new(Script {
        init_exit: 1,
        init_stderr: "Error: florago environment Already Initialized at ~/.florago".to_string(),
        ..Script::default()
    });
    let report = h.run().await;

    assert_eq!(report.outcome(), PipelineOutcome::Success);
    assert_eq!(stage_status(&report, PipelineStep::Bootstrap), StageStatus::Success);
    let message = report.run.stage(PipelineStep::Bootstrap).unwrap().message.clone();
    assert_eq!(message.as_deref(), Some("already initialized"));
}

#[tokio::test(start_paused = true)]
async fn test_init_unrelated_error_aborts() {
    let h = Harness::new(Script {
        init_exit: 2,
        init_stderr: "python3: command not found".to_string(),
        ..Script::default()
    });
    let report = h.run().await;

    match report.error {
        Some(PipelineError::Transport {
            step: PipelineStep::Bootstrap,
            source: TransportError::NonZeroExit { code, ref stderr, .. },
        }) => {
            assert_eq!(code, 2);
            assert!(stderr.contains("command not found"));
        }
        ref other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(h.tunnels.opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_already_running_is_distinct_and_not_retried() {
    let h = Harness::new(Script {
        provision: Provision::AlreadyRunning,
        ..Script::default()
    });
    let report = h.run().await;

    assert_eq!(report.outcome(), PipelineOutcome::StackAlreadyActive);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(
        report.error.as_ref().map(|e| e.classification()),
        Some("stack already active")
    );
    assert_eq!(h.control.provision_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stage_status(&report, PipelineStep::AwaitReady), StageStatus::Skipped);
    assert_eq!(h.tunnels.closed(), vec![1]);
    assert_eq!(h.control.deprovision_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_classification() {
    let h = Harness::new(Script {
        statuses: vec![pending()],
        ..Script::default()
    });
    let started = tokio::time::Instant::now();
    let report = h.run().await;

    assert_eq!(
        report.error.as_ref().map(|e| e.classification()),
        Some("timed out")
    );
    // deadline 60s, interval 5s
    let waited = started.elapsed();
    assert!(waited >= options().ready_timeout);
    assert!(waited <= options().ready_timeout + options().poll_interval);
    h.assert_tunnels_balanced();
}

#[tokio::test(start_paused = true)]
async fn test_persist_failure_only_warns() {
    let h = Harness::new(Script {
        persist_fails: true,
        ..Script::default()
    });
    let report = h.run().await;

    assert_eq!(report.outcome(), PipelineOutcome::Success);
    assert_eq!(
        stage_status(&report, PipelineStep::PersistEndpoint),
        StageStatus::Degraded
    );
    assert_eq!(h.workload.calls.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_service_start_problems_are_advisory() {
    let h = Harness::new(Script {
        background_fails: true,
        ..Script::default()
    });
    let report = h.run().await;
    assert_eq!(report.outcome(), PipelineOutcome::Success);
    assert_eq!(stage_status(&report, PipelineStep::StartService), StageStatus::Degraded);

    let h = Harness::new(Script {
        pgrep_found: false,
        ..Script::default()
    });
    let report = h.run().await;
    assert_eq!(report.outcome(), PipelineOutcome::Success);
    assert_eq!(stage_status(&report, PipelineStep::StartService), StageStatus::Degraded);
    let probes = h
        .transport
        .commands()
        .iter()
        .filter(|c| c.starts_with("pgrep"))
        .count();
    assert_eq!(probes, 3);
}

#[tokio::test(start_paused = true)]
async fn test_workload_failure_leaves_remote_stack_alone() {
    let h = Harness::new(Script {
        workload_fails: true,
        ..Script::default()
    });
    let report = h.run().await;

    assert!(matches!(
        report.outcome(),
        PipelineOutcome::Failed { step: PipelineStep::RunWorkload, .. }
    ));
    assert_eq!(report.error.as_ref().map(|e| e.classification()), Some("workload"));
    assert!(matches!(
        report.error,
        Some(PipelineError::Workload {
            source: WorkloadError::NonZeroExit { code: 2, .. },
            ..
        })
    ));
    // endpoint was still persisted before the workload ran
    assert_eq!(h.config.persisted.lock().unwrap().len(), 1);
    assert_eq!(h.control.deprovision_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.tunnels.closed(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_workload_closes_tunnel() {
    let h = Harness::new(Script {
        workload_blocks: true,
        ..Script::default()
    });
    let cancel = h.cancel_token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(120)).await;
        cancel.cancel();
    });

    let report = h.run().await;

    assert_eq!(report.outcome(), PipelineOutcome::Cancelled);
    assert!(matches!(report.error, Some(PipelineError::Cancelled)));
    assert_eq!(stage_status(&report, PipelineStep::RunWorkload), StageStatus::Failed);
    assert_eq!(stage_status(&report, PipelineStep::ReleaseTunnel), StageStatus::Success);
    h.assert_tunnels_balanced();
    assert_eq!(h.tunnels.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_while_waiting_for_stack() {
    let h = Harness::new(Script {
        statuses: vec![pending()],
        ..Script::default()
    });
    let cancel = h.cancel_token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(20)).await;
        cancel.cancel();
    });

    let report = h.run().await;

    assert_eq!(report.outcome(), PipelineOutcome::Cancelled);
    assert_eq!(stage_status(&report, PipelineStep::AwaitReady), StageStatus::Failed);
    assert_eq!(stage_status(&report, PipelineStep::PersistEndpoint), StageStatus::Skipped);
    assert_eq!(h.tunnels.closed(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_opens_nothing() {
    let h = Harness::new(Script::default());
    h.cancel_token.cancel();

    let report = h.run().await;

    assert_eq!(report.outcome(), PipelineOutcome::Cancelled);
    assert_eq!(h.tunnels.opened(), 0);
    assert!(h.transport.commands().is_empty());
}

// ============================================================================
// stop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_deprovisions_and_closes_tunnel() {
    let h = Harness::new(Script::default());
    let report = h.stop().await;

    assert_eq!(report.outcome(), PipelineOutcome::Success);
    assert_eq!(report.run.job_id.as_deref(), Some("4242"));
    assert_eq!(h.control.deprovision_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.tunnels.closed(), vec![1]);
    assert!(h.transport.commands().is_empty());
    for step in PipelineStep::STOP {
        assert_eq!(stage_status(&report, step), StageStatus::Success, "{}", step);
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_closes_tunnel_when_deprovision_fails() {
    let h = Harness::new(Script {
        deprovision_fails: true,
        ..Script::default()
    });
    let report = h.stop().await;

    assert!(matches!(
        report.outcome(),
        PipelineOutcome::Failed { step: PipelineStep::Deprovision, .. }
    ));
    assert_eq!(report.exit_code(), 1);
    assert_eq!(stage_status(&report, PipelineStep::ReleaseTunnel), StageStatus::Success);
    assert_eq!(h.tunnels.closed(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_without_login_node() {
    let h = Harness::new(Script {
        login_node: None,
        ..Script::default()
    });
    let report = h.stop().await;

    assert!(matches!(
        report.error,
        Some(PipelineError::Config(ConfigError::MissingLoginNode))
    ));
    assert_eq!(h.tunnels.opened(), 0);
    assert_eq!(stage_status(&report, PipelineStep::ReleaseTunnel), StageStatus::Skipped);
}
