use crate::cli::Cli;
use crate::constants::*;
use std::time::Duration;

/// Tuning for the worker sandbox lifecycle
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// First port handed out; the counter increments from here
    pub port_base: u16,
    /// Deadline for the TCP readiness probe
    pub readiness_timeout: Duration,
    /// Interval between readiness probes
    pub readiness_poll: Duration,
    /// Pad after the port opens, letting the worker finish RPC startup
    pub startup_grace: Duration,
    /// How long a worker gets to exit after a stop request
    pub stop_timeout: Duration,
    /// Lines of combined stdout/stderr retained per worker
    pub log_tail: usize,
    /// Program plus arguments used to launch one worker
    pub worker_command: Vec<String>,
    /// Environment variable forwarded into spawned workers
    pub credential_env: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            port_base: DEFAULT_PORT_BASE,
            readiness_timeout: Duration::from_secs(DEFAULT_READINESS_TIMEOUT_SECS),
            readiness_poll: Duration::from_secs(DEFAULT_READINESS_POLL_SECS),
            startup_grace: Duration::from_secs(DEFAULT_STARTUP_GRACE_SECS),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            log_tail: DEFAULT_LOG_TAIL_LINES,
            worker_command: DEFAULT_WORKER_COMMAND
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            credential_env: WORKER_CREDENTIAL_ENV.to_string(),
        }
    }
}

/// Tuning for the worker RPC client
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Outer retry budget per call
    pub max_attempts: u32,
    /// Linear backoff unit; attempt N waits N times this
    pub backoff: Duration,
    /// Connection budget per attempt
    pub connect_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RPC_MAX_ATTEMPTS,
            backoff: Duration::from_secs(DEFAULT_RPC_BACKOFF_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_RPC_CONNECT_TIMEOUT_SECS),
        }
    }
}

/// Top-level orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub sandbox: SandboxConfig,
    pub rpc: RpcConfig,
    /// Per-attempt deadline for expert calls
    pub expert_call_timeout: Duration,
    /// Per-attempt deadline for the planner call
    pub planner_call_timeout: Duration,
    /// Pause between consecutive worker spawns within one phase
    pub expert_stagger: Duration,
    /// Bounded buffer size per event subscriber
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            rpc: RpcConfig::default(),
            expert_call_timeout: Duration::from_secs(DEFAULT_EXPERT_CALL_TIMEOUT_SECS),
            planner_call_timeout: Duration::from_secs(DEFAULT_PLANNER_CALL_TIMEOUT_SECS),
            expert_stagger: Duration::from_secs(DEFAULT_EXPERT_STAGGER_SECS),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl OrchestratorConfig {
    /// Builds the configuration from parsed CLI arguments (which already
    /// fold in the environment via clap's `env` attributes).
    pub fn from_cli(cli: &Cli) -> Self {
        let mut config = Self::default();
        let command: Vec<String> = cli
            .worker_command
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if !command.is_empty() {
            config.sandbox.worker_command = command;
        }
        config
    }
}
