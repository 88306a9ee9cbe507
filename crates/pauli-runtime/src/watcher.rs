//! Completion detection for exec sessions.
//!
//! The engine has no blocking wait for an exec session, so the watcher polls
//! its status at a fixed interval. Once the session is over (or the poll
//! budget is spent, or the engine stops answering) the watcher stops the
//! container so that everything blocked on it can unwind.

use std::sync::Arc;
use std::time::Duration;

use pauli_common::constants::{MAX_POLLS, POLL_INTERVAL, STOP_TIMEOUT};
use pauli_common::error::PauliError;
use tokio::task::JoinHandle;

use crate::backend::{ContainerBackend, EngineError, StopOptions};

/// Consecutive failed status polls tolerated before giving up.
const MAX_POLL_FAILURES: u32 = 3;

/// What the watcher observed.
#[derive(Debug, Default)]
pub struct WatchReport {
    /// Exit code of the session, once seen terminated.
    pub exit_code: Option<i64>,
    /// Status polls performed.
    pub polls: u32,
    /// Whether the container is known to be stopped afterwards.
    pub container_stopped: bool,
    /// Why the session could not be seen to completion, if it was not.
    pub failure: Option<PauliError>,
}

impl WatchReport {
    /// Returns whether the session was seen terminated.
    #[must_use]
    pub const fn completed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Polls an exec session until it is no longer running.
#[derive(Clone)]
pub struct CompletionWatcher {
    backend: Arc<dyn ContainerBackend>,
    container: String,
    interval: Duration,
    max_polls: u32,
    stop_timeout: Option<Duration>,
}

impl std::fmt::Debug for CompletionWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionWatcher")
            .field("container", &self.container)
            .field("interval", &self.interval)
            .field("max_polls", &self.max_polls)
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

impl CompletionWatcher {
    /// Creates a watcher that stops `container` once its session ends.
    pub fn new(backend: Arc<dyn ContainerBackend>, container: impl Into<String>) -> Self {
        Self {
            backend,
            container: container.into(),
            interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
            stop_timeout: Some(STOP_TIMEOUT),
        }
    }

    /// Sets the delay between two polls.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the poll budget.
    #[must_use]
    pub const fn max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    /// Sets the stop grace period, or `None` to leave the container running.
    #[must_use]
    pub const fn stop_timeout(mut self, stop_timeout: Option<Duration>) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Polls `exec_id` to completion, then stops the container if configured.
    pub async fn watch(&self, exec_id: &str) -> WatchReport {
        let mut report = self.poll(exec_id).await;
        if let Some(timeout) = self.stop_timeout {
            report.container_stopped = self.stop(timeout).await;
        }
        report
    }

    /// Runs [`watch`](Self::watch) as an independent task.
    #[must_use]
    pub fn spawn(self, exec_id: String) -> JoinHandle<WatchReport> {
        tokio::spawn(async move { self.watch(&exec_id).await })
    }

    async fn poll(&self, exec_id: &str) -> WatchReport {
        let mut report = WatchReport::default();
        let mut failures = 0;

        while report.polls < self.max_polls {
            report.polls += 1;
            match self.backend.inspect_exec(exec_id).await {
                Ok(status) if !status.running => {
                    tracing::debug!(
                        container = %self.container,
                        exec = exec_id,
                        exit_code = ?status.exit_code,
                        polls = report.polls,
                        "exec session finished"
                    );
                    report.exit_code = status.exit_code;
                    return report;
                }
                Ok(_) => {
                    failures = 0;
                    tracing::trace!(container = %self.container, exec = exec_id, "still running");
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        container = %self.container,
                        exec = exec_id,
                        attempt = failures,
                        error = %e,
                        "cannot poll exec status"
                    );
                    if failures >= MAX_POLL_FAILURES {
                        report.failure = Some(PauliError::Stream {
                            stream: "exec status".into(),
                            message: e.to_string(),
                        });
                        return report;
                    }
                }
            }
            tokio::time::sleep(self.interval).await;
        }

        report.failure = Some(PauliError::Stream {
            stream: "exec status".into(),
            message: format!("session still running after {} polls", report.polls),
        });
        report
    }

    async fn stop(&self, timeout: Duration) -> bool {
        match self
            .backend
            .stop_container(&self.container, &StopOptions::graceful(timeout))
            .await
        {
            Ok(()) | Err(EngineError::NotModified) => {
                tracing::debug!(container = %self.container, "container stopped");
                true
            }
            Err(e) => {
                tracing::warn!(container = %self.container, error = %e, "cannot stop container");
                false
            }
        }
    }
}
