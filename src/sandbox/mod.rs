//! Worker sandbox lifecycle: port allocation, process spawn, readiness
//! probing, log capture, shutdown.
//!
//! Each expert gets one fresh worker process bound to its own TCP port.
//! The manager owns the port counter and the set of live workers; handles
//! are opaque ids so callers never touch the child process directly.

use crate::config::SandboxConfig;
use crate::errors::Error;
use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque reference to a spawned worker
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    /// Manager-assigned identifier
    pub id: String,
    /// Dial address for RPC, e.g. `127.0.0.1:50060`
    pub address: String,
    pub port: u16,
    /// False when the readiness window expired; the caller may still
    /// proceed and lean on the RPC retry budget, or abort
    pub ready: bool,
}

struct TrackedWorker {
    child: Child,
    port: u16,
    logs: Arc<Mutex<VecDeque<String>>>,
}

struct SandboxState {
    next_port: u16,
    workers: HashMap<String, TrackedWorker>,
}

/// Spawns and tracks isolated worker processes
pub struct SandboxManager {
    config: SandboxConfig,
    state: Mutex<SandboxState>,
}

impl SandboxManager {
    pub fn new(config: SandboxConfig) -> Self {
        let next_port = config.port_base;
        Self {
            config,
            state: Mutex::new(SandboxState {
                next_port,
                workers: HashMap::new(),
            }),
        }
    }

    /// Launches one fresh worker and waits until its port accepts TCP
    /// connections (or the readiness window expires, in which case the
    /// handle is returned with `ready = false`).
    pub async fn spawn(&self, cancel: &CancellationToken) -> Result<WorkerHandle, Error> {
        let port = self.allocate_port()?;

        let (program, args) = self
            .config
            .worker_command
            .split_first()
            .ok_or_else(|| Error::SandboxError("worker command is empty".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match std::env::var(&self.config.credential_env) {
            Ok(credential) => {
                command.env(&self.config.credential_env, credential);
            }
            Err(_) => warn!(
                "{} is not set; spawned worker will have no provider credential",
                self.config.credential_env
            ),
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::SandboxError(format!("failed to spawn worker process: {}", e)))?;

        let logs = Arc::new(Mutex::new(VecDeque::with_capacity(self.config.log_tail)));
        if let Some(stdout) = child.stdout.take() {
            capture_output(stdout, Arc::clone(&logs), self.config.log_tail);
        }
        if let Some(stderr) = child.stderr.take() {
            capture_output(stderr, Arc::clone(&logs), self.config.log_tail);
        }

        let id = Uuid::new_v4().to_string();
        {
            let mut state = self.state.lock().expect("sandbox state lock poisoned");
            state.workers.insert(
                id.clone(),
                TrackedWorker {
                    child,
                    port,
                    logs,
                },
            );
        }
        info!("Spawned worker {} on port {}", &id[..8], port);

        let ready = self.wait_until_reachable(port, cancel).await;
        if ready {
            debug!("Worker on port {} is accepting connections", port);
            // The port being open does not mean the RPC server inside has
            // finished wiring up its routes.
            sleep(self.config.startup_grace).await;
        } else {
            warn!(
                "Worker on port {} did not become ready within {:?}",
                port, self.config.readiness_timeout
            );
        }

        Ok(WorkerHandle {
            id,
            address: format!("127.0.0.1:{}", port),
            port,
            ready,
        })
    }

    /// Reserves the next free port. Ports already bound by other processes
    /// are skipped by incrementing the counter.
    fn allocate_port(&self) -> Result<u16, Error> {
        let mut state = self.state.lock().expect("sandbox state lock poisoned");
        loop {
            let port = state.next_port;
            state.next_port = state
                .next_port
                .checked_add(1)
                .ok_or_else(|| Error::SandboxError("worker port space exhausted".to_string()))?;
            match std::net::TcpListener::bind(("127.0.0.1", port)) {
                Ok(probe) => {
                    drop(probe);
                    return Ok(port);
                }
                Err(_) => {
                    debug!("Port {} is in use, trying the next one", port);
                }
            }
        }
    }

    async fn wait_until_reachable(&self, port: u16, cancel: &CancellationToken) -> bool {
        let deadline = Instant::now() + self.config.readiness_timeout;
        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return false;
            }
            if let Ok(Ok(stream)) =
                timeout(Duration::from_secs(2), TcpStream::connect(("127.0.0.1", port))).await
            {
                drop(stream);
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = sleep(self.config.readiness_poll) => {}
            }
        }
        false
    }

    /// Requests shutdown of one worker and releases its port. The port is
    /// reclaimed even when the process refuses to die.
    pub async fn stop(&self, handle_id: &str) -> Result<(), Error> {
        let worker = {
            let mut state = self.state.lock().expect("sandbox state lock poisoned");
            state.workers.remove(handle_id)
        };
        let Some(mut worker) = worker else {
            // Already reclaimed; stopping twice is not an error.
            return Ok(());
        };

        if let Err(e) = worker.child.start_kill() {
            warn!("Failed to signal worker {}: {}", &handle_id[..8], e);
        }
        match timeout(self.config.stop_timeout, worker.child.wait()).await {
            Ok(Ok(status)) => debug!(
                "Worker {} on port {} exited with {}",
                &handle_id[..8],
                worker.port,
                status
            ),
            Ok(Err(e)) => warn!("Failed to reap worker {}: {}", &handle_id[..8], e),
            Err(_) => warn!(
                "Worker {} did not exit within {:?}",
                &handle_id[..8],
                self.config.stop_timeout
            ),
        }
        Ok(())
    }

    /// Tail of the worker's combined stdout/stderr, for diagnostics after
    /// a failed call.
    pub fn logs(&self, handle_id: &str) -> Result<String, Error> {
        let state = self.state.lock().expect("sandbox state lock poisoned");
        let worker = state
            .workers
            .get(handle_id)
            .ok_or_else(|| Error::SandboxError(format!("unknown worker {}", handle_id)))?;
        let lines = worker.logs.lock().expect("worker log lock poisoned");
        Ok(lines.iter().cloned().collect::<Vec<_>>().join("\n"))
    }

    /// Best-effort shutdown of every tracked worker, used on process exit.
    pub async fn stop_all(&self) {
        let workers: Vec<(String, TrackedWorker)> = {
            let mut state = self.state.lock().expect("sandbox state lock poisoned");
            state.workers.drain().collect()
        };
        for (id, mut worker) in workers {
            let _ = worker.child.start_kill();
            let _ = timeout(Duration::from_secs(5), worker.child.wait()).await;
            info!("Cleaned up worker {} on port {}", &id[..8], worker.port);
        }
    }

    /// Number of live workers; exposed for diagnostics
    pub fn active_workers(&self) -> usize {
        self.state
            .lock()
            .expect("sandbox state lock poisoned")
            .workers
            .len()
    }
}

/// Streams one output pipe into the bounded log ring.
fn capture_output<R>(reader: R, logs: Arc<Mutex<VecDeque<String>>>, cap: usize)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut buffer = logs.lock().expect("worker log lock poisoned");
            if buffer.len() == cap {
                buffer.pop_front();
            }
            buffer.push_back(line);
        }
    });
}
