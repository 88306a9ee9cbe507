//! Container engine abstraction.
//!
//! [`ContainerBackend`] is the capability boundary: everything the
//! orchestrator asks of the engine goes through it, and every engine failure
//! comes back as a closed [`EngineError`] classification instead of a raw
//! client error.

pub mod docker;
pub mod mock;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use pauli_common::error::{PauliError, Result};
use pauli_common::types::ContainerId;
use thiserror::Error;

use crate::assemble::ContainerConfig;

/// Classification of an engine failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The resource already exists (HTTP 409).
    #[error("conflict: {0}")]
    Conflict(String),
    /// The container, exec session, or image does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),
    /// The request was rejected as malformed (HTTP 400).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The request had no effect, e.g. starting a running container (HTTP 304).
    #[error("not modified")]
    NotModified,
    /// Anything else: daemon unreachable, permission denied, server error.
    #[error("{0}")]
    Fatal(String),
}

impl EngineError {
    /// Converts into the workspace error, tagging the failed operation.
    #[must_use]
    pub fn during(self, operation: &'static str) -> PauliError {
        PauliError::Engine {
            operation,
            message: self.to_string(),
        }
    }
}

/// Result of an engine call.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Which host stream a chunk of engine output belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    /// Standard output of the process.
    Stdout,
    /// Standard error of the process.
    Stderr,
    /// Merged pseudo-terminal output.
    Console,
}

/// A chunk of output read from an engine stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Stream the bytes were written to.
    pub origin: StreamOrigin,
    /// Raw bytes.
    pub bytes: Vec<u8>,
}

impl OutputChunk {
    /// Creates a console chunk.
    #[must_use]
    pub fn console(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            origin: StreamOrigin::Console,
            bytes: bytes.into(),
        }
    }
}

/// Stream of output chunks, e.g. an attached exec session or followed logs.
pub type ChunkStream = Pin<Box<dyn Stream<Item = EngineResult<OutputChunk>> + Send>>;

/// Stream of human-readable image pull progress lines.
pub type ProgressStream = Pin<Box<dyn Stream<Item = EngineResult<String>> + Send>>;

/// A container as listed or inspected by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Engine identifier.
    pub id: ContainerId,
    /// Names, possibly with the engine's leading `/`.
    pub names: Vec<String>,
    /// Whether the container is running.
    pub running: bool,
}

impl ContainerSummary {
    /// Returns whether one of the names equals `name`, ignoring a leading `/`.
    #[must_use]
    pub fn has_name(&self, name: &str) -> bool {
        self.names
            .iter()
            .any(|n| n.strip_prefix('/').unwrap_or(n) == name)
    }
}

/// Configuration of an exec session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    /// Command and arguments.
    pub cmd: Vec<String>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: String,
    /// Whether a pseudo-terminal is allocated.
    pub tty: bool,
}

/// Run state of an exec session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecStatus {
    /// Whether the session's process is still running.
    pub running: bool,
    /// Exit code, once the process has terminated.
    pub exit_code: Option<i64>,
}

/// Options of a stop call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOptions {
    /// Grace period before the engine kills the container.
    pub timeout: Duration,
    /// Signal to send instead of the image's stop signal.
    pub signal: Option<String>,
}

impl StopOptions {
    /// Graceful stop with the given grace period.
    #[must_use]
    pub const fn graceful(timeout: Duration) -> Self {
        Self {
            timeout,
            signal: None,
        }
    }

    /// Immediate `SIGKILL`.
    #[must_use]
    pub fn kill() -> Self {
        Self {
            timeout: Duration::ZERO,
            signal: Some("SIGKILL".to_owned()),
        }
    }
}

/// Container engine operations used by the orchestrator.
///
/// Implementors translate these calls to a concrete engine and classify its
/// failures into [`EngineError`].
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Creates a container, returning its identifier.
    async fn create_container(&self, config: &ContainerConfig) -> EngineResult<ContainerId>;

    /// Inspects a container by name.
    async fn inspect_container(&self, name: &str) -> EngineResult<ContainerSummary>;

    /// Lists all containers, including stopped ones.
    async fn list_containers(&self) -> EngineResult<Vec<ContainerSummary>>;

    /// Starts a container.
    async fn start_container(&self, name: &str) -> EngineResult<()>;

    /// Pulls an image, streaming progress until the pull completes.
    fn pull_image(&self, image: &str) -> ProgressStream;

    /// Creates an exec session bound to a container, returning its identifier.
    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> EngineResult<String>;

    /// Starts an exec session and returns its attached output.
    async fn start_exec(&self, exec_id: &str) -> EngineResult<ChunkStream>;

    /// Returns the run state of an exec session.
    async fn inspect_exec(&self, exec_id: &str) -> EngineResult<ExecStatus>;

    /// Follows a container's log stream from its creation.
    fn logs(&self, container: &str) -> ChunkStream;

    /// Blocks until the container is not running, returning its exit code.
    async fn wait_not_running(&self, container: &str) -> EngineResult<i64>;

    /// Stops a container.
    async fn stop_container(&self, container: &str, options: &StopOptions) -> EngineResult<()>;

    /// Removes a container.
    async fn remove_container(&self, container: &str, force: bool) -> EngineResult<()>;
}

/// Connects to the local Docker-compatible engine.
///
/// # Errors
///
/// Returns an engine error if no local engine endpoint can be configured.
pub fn connect() -> Result<Arc<dyn ContainerBackend>> {
    let backend = docker::DockerBackend::connect_local()?;
    Ok(Arc::new(backend))
}
