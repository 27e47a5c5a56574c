/// First port handed to a spawned worker; allocation counts upward from here
pub const DEFAULT_PORT_BASE: u16 = 50060;
/// How long to wait for a worker's port to accept a TCP connection
pub const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 30;
/// Interval between readiness probes
pub const DEFAULT_READINESS_POLL_SECS: u64 = 1;
/// Extra pad after the port opens, covering RPC framework startup
pub const DEFAULT_STARTUP_GRACE_SECS: u64 = 5;
/// How long a worker gets to exit after a stop request
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;
/// Lines of combined stdout/stderr kept per worker for diagnostics
pub const DEFAULT_LOG_TAIL_LINES: usize = 50;

/// Worker RPC retry budget
pub const DEFAULT_RPC_MAX_ATTEMPTS: u32 = 3;
/// Linear backoff unit between attempts (attempt * this)
pub const DEFAULT_RPC_BACKOFF_SECS: u64 = 2;
/// Connection budget per attempt, including handshake
pub const DEFAULT_RPC_CONNECT_TIMEOUT_SECS: u64 = 30;
/// Per-attempt deadline for an expert call
pub const DEFAULT_EXPERT_CALL_TIMEOUT_SECS: u64 = 120;
/// Per-attempt deadline for the planner call
pub const DEFAULT_PLANNER_CALL_TIMEOUT_SECS: u64 = 300;

/// Pause between consecutive worker spawns within one phase
pub const DEFAULT_EXPERT_STAGGER_SECS: u64 = 2;
/// Bounded buffer size per event subscriber
pub const DEFAULT_EVENT_BUFFER: usize = 16;

/// Command used to launch one worker process; the allocated port is
/// appended as the final argument
pub const DEFAULT_WORKER_COMMAND: &str = "python agent.py";
/// Environment variable forwarded into every spawned worker
pub const WORKER_CREDENTIAL_ENV: &str = "OPENAI_API_KEY";

/// System prompt for the planner worker
pub const PLANNER_PERSONA: &str = "You are a JSON response generator. You ONLY output valid JSON. \
You never include explanations, comments, or any text outside the JSON structure.";

/// Planning prompt template; `{objective}` is replaced with the user task
pub const PLANNING_PROMPT_TEMPLATE: &str = r#"You are a world-class AI project manager. Break the user's request down into a sequence of logical PHASES, each staffed by a small set of domain experts that can work in parallel.

Constraint checklist:
1. The first phase must not contain more than 10 experts.
2. Tasks for experts in the first phase must be self-contained. Instruct them explicitly that they are NOT allowed to delegate.
3. Later phases must build on the results of earlier ones (e.g. Phase 1: planning, Phase 2: implementation).

User task: "{objective}"

Your output MUST be ONLY valid JSON in this exact format:
{
  "phases": [
    {
      "id": "phase_1_planning",
      "name": "Initial Design and Planning",
      "description": "Define the architecture, requirements, and user experience.",
      "experts": [
        {
          "role": "Lead Architect",
          "expertise": "Overall system design and technology stack selection.",
          "persona": "You are a Lead Architect. You must execute this task yourself and are not allowed to delegate it further.",
          "task": "Create a detailed technical architecture document for the user task."
        }
      ]
    }
  ]
}"#;
