//! Exec sessions run inside an already started build container.

/// A unit of work executed inside a running container.
///
/// Exec sessions never own the container's primary process; stopping the
/// container is the orchestrator's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Command and arguments.
    pub command: Vec<String>,
    /// `KEY=VALUE` entries for this session.
    pub env: Vec<String>,
}

impl ExecRequest {
    /// Creates a request without environment overrides.
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            env: Vec::new(),
        }
    }
}

/// What an exec session left behind once both completion signals resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Exit code reported by the engine, when it reported one.
    pub exit_code: Option<i64>,
    /// Number of status polls the watcher performed.
    pub polls: u32,
    /// Whether the container was stopped after the session.
    pub container_stopped: bool,
    /// Whether every relayed stream drained without error.
    pub output_complete: bool,
}

impl ExecOutcome {
    /// Process exit status to report for this session.
    ///
    /// Unknown exit codes map to `1`; codes outside the `i32` range are
    /// clamped to `255`.
    #[must_use]
    pub fn exit_status(&self) -> i32 {
        self.exit_code
            .map_or(1, |code| i32::try_from(code).unwrap_or(255))
    }
}
