//! SSH port-forward manager
//!
//! Each tunnel is a local `ssh -N -L <local>:localhost:<remote> <host>` child process.
//! Children are keyed by local port, so at most one tunnel per port is active at a time.

use std::{
    collections::{HashMap, VecDeque},
    io::ErrorKind,
    process::{ExitStatus, Stdio},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::{TcpListener, TcpStream},
    process::{Child, Command},
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    config::{
        env::constants::{TUNNEL_GRACE_MS, TUNNEL_PROBE_INTERVAL_MS, TUNNEL_SETTLE_MS},
        RuntimeSettings,
    },
    domain::tunnel::{RemoteHost, TunnelHandle, TunnelSpec, TunnelState},
    error::TunnelError,
};

const STDERR_TAIL_LINES: usize = 50;

type StderrTail = Arc<RwLock<VecDeque<String>>>;

#[async_trait]
pub trait TunnelManager: Send + Sync {
    /// Start forwarding `localhost:<local_port>` to `localhost:<remote_port>` on `host`.
    async fn open(
        &self,
        host: &RemoteHost,
        local_port: u16,
        remote_port: u16,
    ) -> Result<TunnelHandle, TunnelError>;

    async fn is_alive(&self, handle: &TunnelHandle) -> bool;

    /// Idempotent. Never fails; problems are logged.
    async fn close(&self, handle: &TunnelHandle);
}

struct TunnelEntry {
    id: u64,
    child: Child,
    stderr: StderrTail,
    /// set once `open` has confirmed the forward
    ready: bool,
}

pub struct SshTunnelManager {
    ssh_program: String,
    options: Vec<String>,
    grace: Duration,
    settle: Duration,
    probe_interval: Duration,
    entries: Mutex<HashMap<u16, TunnelEntry>>,
    next_id: AtomicU64,
}

impl SshTunnelManager {
    pub fn new(settings: &RuntimeSettings) -> Self {
        let mut options = vec![
            "ExitOnForwardFailure=yes".to_string(),
            "BatchMode=yes".to_string(),
            format!("ConnectTimeout={}", settings.ssh_connect_timeout_secs),
        ];
        options.extend(settings.ssh_options.iter().cloned());

        Self {
            ssh_program: settings.ssh_program.clone(),
            options,
            grace: Duration::from_millis(TUNNEL_GRACE_MS),
            settle: Duration::from_millis(TUNNEL_SETTLE_MS),
            probe_interval: Duration::from_millis(TUNNEL_PROBE_INTERVAL_MS),
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_grace(mut self, grace: Duration, probe_interval: Duration) -> Self {
        self.grace = grace;
        self.probe_interval = probe_interval;
        self
    }

    /// `ssh -N -o ... -L <forward> <host>`
    pub fn command_args(&self, spec: &TunnelSpec) -> Vec<String> {
        let mut args = vec!["-N".to_string()];
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push("-L".to_string());
        args.push(spec.forward_arg());
        args.push(spec.host.as_str().to_string());
        args
    }

    /// `Starting` until `open` returns, then `Alive` while the process runs.
    pub async fn state(&self, handle: &TunnelHandle) -> TunnelState {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&handle.local_port()) {
            Some(entry) if entry.id == handle.id => match entry.child.try_wait() {
                Ok(None) if entry.ready => TunnelState::Alive,
                Ok(None) => TunnelState::Starting,
                Ok(Some(_)) => TunnelState::Dead,
                Err(e) => {
                    warn!(local_port = handle.local_port(), error = %e, "Failed to query tunnel process");
                    TunnelState::Dead
                }
            },
            _ => TunnelState::Dead,
        }
    }

    /// Fails with `PortInUse` when another process already listens on the port.
    async fn ensure_port_free(local_port: u16) -> Result<(), TunnelError> {
        match TcpListener::bind(("127.0.0.1", local_port)).await {
            Ok(_listener) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AddrInUse => Err(TunnelError::PortInUse(local_port)),
            Err(e) => {
                debug!(local_port, error = %e, "Port check inconclusive, leaving it to ssh");
                Ok(())
            }
        }
    }

    async fn exit_status(&self, local_port: u16, id: u64) -> Result<Option<ExitStatus>, TunnelError> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(&local_port) {
            Some(entry) if entry.id == id => entry.child.try_wait().map_err(TunnelError::Inspect),
            _ => Err(TunnelError::Inspect(std::io::Error::new(
                ErrorKind::NotFound,
                "tunnel entry removed while opening",
            ))),
        }
    }

    /// Wait for the forward to come up. A port that accepts connections only counts once the
    /// process has stayed up for the settle time; a process still running at the end of the
    /// grace period counts as open. The process is re-checked right before success.
    async fn await_forward(
        &self,
        local_port: u16,
        id: u64,
        stderr: &StderrTail,
        drain: &mut JoinHandle<()>,
    ) -> Result<(), TunnelError> {
        let started = Instant::now();
        let deadline = started + self.grace;
        let settled = started + self.settle.min(self.grace);

        loop {
            if let Some(status) = self.exit_status(local_port, id).await? {
                return Err(exited_early(status, stderr, drain).await);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(local_port, "Grace period elapsed with tunnel process running");
                return Ok(());
            }

            if now >= settled && TcpStream::connect(("127.0.0.1", local_port)).await.is_ok() {
                if let Some(status) = self.exit_status(local_port, id).await? {
                    return Err(exited_early(status, stderr, drain).await);
                }
                debug!(local_port, "Tunnel accepting connections");
                return Ok(());
            }

            sleep(self.probe_interval.min(deadline.saturating_duration_since(now))).await;
        }
    }
}

async fn exited_early(status: ExitStatus, stderr: &StderrTail, drain: &mut JoinHandle<()>) -> TunnelError {
    // stderr may still be in flight
    let _ = tokio::time::timeout(Duration::from_millis(500), drain).await;
    TunnelError::ExitedEarly {
        status,
        stderr_tail: joined_tail(stderr).await,
    }
}

async fn joined_tail(stderr: &StderrTail) -> String {
    stderr.read().await.iter().cloned().collect::<Vec<_>>().join("\n")
}

fn push_line(buf: &mut VecDeque<String>, line: String) {
    buf.push_back(line);
    while buf.len() > STDERR_TAIL_LINES {
        buf.pop_front();
    }
}

#[async_trait]
impl TunnelManager for SshTunnelManager {
    async fn open(
        &self,
        host: &RemoteHost,
        local_port: u16,
        remote_port: u16,
    ) -> Result<TunnelHandle, TunnelError> {
        let spec = TunnelSpec::new(host.clone(), local_port, remote_port);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stderr: StderrTail = Arc::new(RwLock::new(VecDeque::new()));

        let mut drain = {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(&local_port) {
                match entry.child.try_wait() {
                    Ok(None) => return Err(TunnelError::PortInUse(local_port)),
                    _ => {
                        debug!(local_port, "Discarding exited tunnel entry");
                        entries.remove(&local_port);
                    }
                }
            }
            Self::ensure_port_free(local_port).await?;

            let args = self.command_args(&spec);
            info!(host = %host, local_port, remote_port, "Opening SSH tunnel");

            let mut child = Command::new(&self.ssh_program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| TunnelError::Spawn {
                    program: self.ssh_program.clone(),
                    source: e,
                })?;

            let drain = match child.stderr.take() {
                Some(pipe) => {
                    let lines = stderr.clone();
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(pipe).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            push_line(&mut *lines.write().await, line);
                        }
                    })
                }
                None => tokio::spawn(async {}),
            };

            entries.insert(
                local_port,
                TunnelEntry {
                    id,
                    child,
                    stderr: stderr.clone(),
                    ready: false,
                },
            );
            drain
        };

        let forwarded = self.await_forward(local_port, id, &stderr, &mut drain).await;

        let mut entries = self.entries.lock().await;
        if let Err(e) = forwarded {
            warn!(host = %host, local_port, error = %e, "SSH tunnel failed to open");
            if let Some(mut entry) = entries.remove(&local_port) {
                let _ = entry.child.kill().await;
            }
            return Err(e);
        }

        let pid = match entries.get_mut(&local_port) {
            Some(entry) if entry.id == id => {
                entry.ready = true;
                entry.child.id()
            }
            _ => None,
        };
        let handle = TunnelHandle { id, spec, pid };

        info!(local_port, pid = ?handle.pid, "SSH tunnel open");
        Ok(handle)
    }

    async fn is_alive(&self, handle: &TunnelHandle) -> bool {
        self.state(handle).await == TunnelState::Alive
    }

    async fn close(&self, handle: &TunnelHandle) {
        let entry = {
            let mut entries = self.entries.lock().await;
            match entries.get(&handle.local_port()) {
                Some(entry) if entry.id == handle.id => entries.remove(&handle.local_port()),
                _ => None,
            }
        };

        let Some(mut entry) = entry else {
            debug!(local_port = handle.local_port(), id = handle.id, "Tunnel already closed");
            return;
        };

        match entry.child.try_wait() {
            Ok(Some(status)) => {
                let stderr = joined_tail(&entry.stderr).await;
                warn!(
                    local_port = handle.local_port(),
                    %status,
                    stderr = %stderr,
                    "Tunnel process had died before close"
                );
            }
            _ => {
                if let Err(e) = entry.child.kill().await {
                    warn!(local_port = handle.local_port(), error = %e, "Failed to kill tunnel process");
                }
            }
        }

        info!(local_port = handle.local_port(), "SSH tunnel closed");
    }
}
