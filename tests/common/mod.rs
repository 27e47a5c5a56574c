//! Shared fixtures for integration tests.
#![allow(dead_code)]

use maestro::config::{OrchestratorConfig, RpcConfig, SandboxConfig};
use maestro::core::{Expert, ExpertStatus, Phase, PhaseStatus, Scheduler, Task, TaskStatus};
use maestro::db::{Database, TaskRepository};
use maestro::event::OrchestratorEvent;
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// Configuration with millisecond-scale timeouts. The default worker
/// command never opens its port, so expert calls fail as transport errors
/// almost immediately.
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.sandbox = SandboxConfig {
        readiness_timeout: Duration::from_millis(100),
        readiness_poll: Duration::from_millis(20),
        startup_grace: Duration::from_millis(0),
        stop_timeout: Duration::from_millis(500),
        worker_command: vec!["sleep".to_string(), "30".to_string()],
        ..SandboxConfig::default()
    };
    config.rpc = RpcConfig {
        max_attempts: 1,
        backoff: Duration::from_millis(10),
        connect_timeout: Duration::from_millis(300),
    };
    config.expert_call_timeout = Duration::from_millis(500);
    config.planner_call_timeout = Duration::from_millis(500);
    config.expert_stagger = Duration::from_millis(0);
    config
}

pub fn open_scheduler(config: OrchestratorConfig) -> (TempDir, Scheduler, Database) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tasks.db");
    let db = Database::new(path.to_str().unwrap());
    let scheduler = Scheduler::new(db.clone(), config);
    (dir, scheduler, db)
}

pub fn store_task(db: &Database, task: &Task) {
    let mut conn = db.get_conn();
    TaskRepository::new(&mut conn).upsert_task(task).unwrap();
}

pub fn expert(role: &str, status: ExpertStatus) -> Expert {
    Expert {
        role: role.to_string(),
        expertise: format!("{} expertise", role),
        persona: format!("You are a {}.", role),
        task: format!("Do the {} work.", role),
        status,
        result: None,
        extra: serde_json::Map::new(),
    }
}

pub fn phase(id: &str, status: PhaseStatus, experts: Vec<Expert>) -> Phase {
    Phase {
        id: id.to_string(),
        name: format!("Phase {}", id),
        description: format!("Description of {}", id),
        status,
        experts,
        results: BTreeMap::new(),
        start_time: None,
        end_time: None,
        approved: false,
        user_feedback: None,
        extra: serde_json::Map::new(),
    }
}

pub fn seeded_task(
    id: &str,
    status: TaskStatus,
    requires_user_approval: bool,
    current_phase: usize,
    phases: Vec<Phase>,
) -> Task {
    let mut task = Task::new(id.to_string(), "Seeded objective".to_string(), requires_user_approval);
    task.status = status;
    task.current_phase = current_phase;
    task.phases = phases;
    task
}

/// Receives the next event or panics after five seconds.
pub async fn recv_event(rx: &mut broadcast::Receiver<OrchestratorEvent>) -> OrchestratorEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Collects events until one of `stop_kind` arrives (inclusive).
pub async fn collect_until(
    rx: &mut broadcast::Receiver<OrchestratorEvent>,
    stop_kind: maestro::event::EventKind,
) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    loop {
        let event = recv_event(rx).await;
        let done = event.kind == stop_kind;
        events.push(event);
        if done {
            return events;
        }
    }
}

/// A stub worker in Python, used when a test needs a real end-to-end
/// run. The planner call (task id suffixed `-planner`) gets a one-phase
/// plan with a single `poet` expert; expert calls get a plain result.
pub const PYTHON_WORKER_OK: &str = r#"
import json, sys
from http.server import BaseHTTPRequestHandler, HTTPServer

PLAN = {"phases": [{
    "id": "phase_1_write",
    "name": "Write",
    "description": "Write the haiku.",
    "experts": [{
        "role": "poet",
        "expertise": "Poetry",
        "persona": "You are a poet. Do not delegate.",
        "task": "Write a haiku about ports."
    }]
}]}

class Handler(BaseHTTPRequestHandler):
    def do_POST(self):
        length = int(self.headers.get('content-length', 0))
        body = json.loads(self.rfile.read(length) or b'{}')
        task_id = body.get('taskId', '')
        if task_id.endswith('-planner'):
            reply = {'taskId': task_id, 'success': True, 'finalContent': json.dumps(PLAN)}
        else:
            reply = {'taskId': task_id, 'success': True, 'finalContent': 'An old silent pond'}
        data = json.dumps(reply).encode()
        self.send_response(200)
        self.send_header('content-type', 'application/json')
        self.send_header('content-length', str(len(data)))
        self.end_headers()
        self.wfile.write(data)

    def log_message(self, *args):
        pass

HTTPServer(('127.0.0.1', int(sys.argv[1])), Handler).serve_forever()
"#;

/// Like [`PYTHON_WORKER_OK`] but every expert call tries to delegate,
/// which phase 0 forbids.
pub const PYTHON_WORKER_DELEGATES: &str = r#"
import json, sys
from http.server import BaseHTTPRequestHandler, HTTPServer

PLAN = {"phases": [{
    "id": "phase_1_write",
    "name": "Write",
    "description": "Write the haiku.",
    "experts": [{
        "role": "poet",
        "expertise": "Poetry",
        "persona": "You are a poet. Do not delegate.",
        "task": "Write a haiku about ports."
    }]
}]}

class Handler(BaseHTTPRequestHandler):
    def do_POST(self):
        length = int(self.headers.get('content-length', 0))
        body = json.loads(self.rfile.read(length) or b'{}')
        task_id = body.get('taskId', '')
        if task_id.endswith('-planner'):
            reply = {'taskId': task_id, 'success': True, 'finalContent': json.dumps(PLAN)}
        else:
            reply = {'taskId': task_id, 'success': True, 'subTasks': [
                {'requestedPersona': 'You are a researcher.', 'taskDetails': 'Collect imagery.'}
            ]}
        data = json.dumps(reply).encode()
        self.send_response(200)
        self.send_header('content-type', 'application/json')
        self.send_header('content-length', str(len(data)))
        self.end_headers()
        self.wfile.write(data)

    def log_message(self, *args):
        pass

HTTPServer(('127.0.0.1', int(sys.argv[1])), Handler).serve_forever()
"#;

/// Skips end-to-end tests on machines without a Python interpreter.
pub fn python3_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Config whose workers are real local Python HTTP servers. Each test
/// gets its own port base so parallel tests never race for a port.
pub fn python_worker_config(code: &str, port_base: u16) -> OrchestratorConfig {
    let mut config = fast_config();
    config.sandbox.port_base = port_base;
    config.sandbox.readiness_timeout = Duration::from_secs(10);
    config.sandbox.readiness_poll = Duration::from_millis(50);
    config.rpc.max_attempts = 3;
    config.expert_call_timeout = Duration::from_secs(10);
    config.planner_call_timeout = Duration::from_secs(10);
    config.sandbox.worker_command = vec![
        "python3".to_string(),
        "-c".to_string(),
        code.to_string(),
    ];
    config
}
