//! Container lifecycle orchestration.
//!
//! An [`Orchestrator`] drives one build container through
//! `Unresolved → {Reused | Created} → Started → (Executing)* → Stopped → Removed`:
//! it decides whether to create or reuse, recovers from the engine failures
//! that have a known remedy, runs exec sessions while relaying their output,
//! and tears down.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pauli_common::constants::{MAX_POLLS, POLL_INTERVAL, STOP_TIMEOUT};
use pauli_common::error::{PauliError, Result};
use pauli_common::types::{LifecycleState, RuntimeHandle};
use tokio::io::AsyncWriteExt;

use crate::assemble::ContainerConfig;
use crate::backend::{ContainerBackend, EngineError, ExecSpec, StopOptions};
use crate::exec::{ExecOutcome, ExecRequest};
use crate::relay::{self, Sinks};
use crate::resolver::{self, ResolveStrategy};
use crate::shell::InteractiveSession;
use crate::watcher::CompletionWatcher;

/// Tunables of an orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Delay between two exec status polls.
    pub poll_interval: Duration,
    /// Poll budget of an exec session.
    pub max_polls: u32,
    /// Grace period of stop calls.
    pub stop_timeout: Duration,
    /// How existing containers are looked up.
    pub strategy: ResolveStrategy,
    /// Leave the container running after an exec session.
    pub keep_running: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            max_polls: MAX_POLLS,
            stop_timeout: STOP_TIMEOUT,
            strategy: ResolveStrategy::default(),
            keep_running: false,
        }
    }
}

/// What happens to the container once the work is done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Teardown {
    /// Leave it as it is.
    #[default]
    Keep,
    /// Stop it if it runs.
    Stop,
    /// Stop it, then remove it.
    Remove,
}

/// Why a create call failed, as far as the orchestrator is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateFailure {
    /// The name is taken; the existing container can be reused.
    ConflictRecoverable(String),
    /// The image is not present locally.
    ImageMissing(String),
    /// The engine rejected the request, typically the mount collection.
    Configuration(String),
    /// Anything else.
    Fatal(String),
}

impl From<EngineError> for CreateFailure {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Conflict(message) => Self::ConflictRecoverable(message),
            EngineError::NotFound(message) => Self::ImageMissing(message),
            EngineError::InvalidParameter(message) => Self::Configuration(message),
            EngineError::NotModified => Self::Fatal("create had no effect".to_owned()),
            EngineError::Fatal(message) => Self::Fatal(message),
        }
    }
}

/// Drives a single build container.
pub struct Orchestrator {
    backend: Arc<dyn ContainerBackend>,
    config: ContainerConfig,
    settings: OrchestratorSettings,
    sinks: Sinks,
    state: LifecycleState,
    handle: Option<RuntimeHandle>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("container", &self.config.name)
            .field("state", &self.state)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator for `config`; nothing is asked of the engine yet.
    pub fn new(
        backend: Arc<dyn ContainerBackend>,
        config: ContainerConfig,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            backend,
            config,
            settings,
            sinks: Sinks::default(),
            state: LifecycleState::Unresolved,
            handle: None,
        }
    }

    /// Sends relayed output and pull progress to `sinks` instead of the
    /// process's own streams.
    #[must_use]
    pub fn with_sinks(mut self, sinks: Sinks) -> Self {
        self.sinks = sinks;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Bound container identity, once resolved.
    #[must_use]
    pub const fn handle(&self) -> Option<&RuntimeHandle> {
        self.handle.as_ref()
    }

    /// Configuration the container is created with.
    #[must_use]
    pub const fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Finds the container by name or creates it.
    ///
    /// A missing image is pulled and creation retried once. A name conflict
    /// means another invocation created the container first; it is reused.
    ///
    /// # Errors
    ///
    /// Returns [`PauliError::ImageMissing`] if the image is still missing
    /// after the pull, a configuration error if the engine rejects the
    /// request, or an engine error for anything else.
    pub async fn create_or_resolve(&mut self) -> Result<RuntimeHandle> {
        let name = self.config.name.clone();
        if let Some(handle) = resolver::lookup(&*self.backend, &name, self.settings.strategy).await? {
            tracing::info!(container = %name, id = %handle.container_id.short(), "reusing existing container");
            return Ok(self.bind(handle, LifecycleState::Reused));
        }

        let mut pulled = false;
        loop {
            let failure = match self.backend.create_container(&self.config).await {
                Ok(id) => {
                    tracing::info!(container = %name, id = %id.short(), image = %self.config.image, "container created");
                    let handle = RuntimeHandle {
                        container_id: id,
                        container_name: name,
                    };
                    return Ok(self.bind(handle, LifecycleState::Created));
                }
                Err(e) => CreateFailure::from(e),
            };

            match failure {
                CreateFailure::ConflictRecoverable(message) => {
                    tracing::debug!(container = %name, %message, "name taken, resolving existing container");
                    let handle = resolver::lookup(&*self.backend, &name, self.settings.strategy)
                        .await?
                        .ok_or_else(|| PauliError::Engine {
                            operation: "create_container",
                            message: format!(
                                "{message}, but no container named {name} could be found"
                            ),
                        })?;
                    return Ok(self.bind(handle, LifecycleState::Reused));
                }
                CreateFailure::ImageMissing(message) if !pulled => {
                    tracing::info!(image = %self.config.image, %message, "image not found locally, pulling");
                    self.pull().await?;
                    pulled = true;
                }
                CreateFailure::ImageMissing(_) => {
                    return Err(PauliError::ImageMissing {
                        image: self.config.image.clone(),
                    });
                }
                CreateFailure::Configuration(message) => {
                    return Err(PauliError::config(format!(
                        "builder.volumes: the engine rejected the mount collection: {message}"
                    )));
                }
                CreateFailure::Fatal(message) => {
                    return Err(PauliError::Engine {
                        operation: "create_container",
                        message,
                    });
                }
            }
        }
    }

    /// Starts the container; a container that already runs is fine.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no container is bound yet, or an
    /// engine error if the start fails.
    pub async fn start(&mut self) -> Result<()> {
        let name = self.bound_name("start")?;
        match self.backend.start_container(&name).await {
            Ok(()) => tracing::info!(container = %name, "container started"),
            Err(EngineError::NotModified) => {
                tracing::debug!(container = %name, "container already running");
            }
            Err(e) => return Err(e.during("start_container")),
        }
        self.state = LifecycleState::Started;
        Ok(())
    }

    /// Runs `request` in the started container and waits for it to finish.
    ///
    /// Returns once the session is seen terminated, the container (unless
    /// kept running) has stopped, and the relayed streams have drained.
    /// Stream failures are logged and reflected in the outcome.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the container was not started, or an
    /// engine error if the session cannot be created or attached.
    pub async fn exec(&mut self, request: &ExecRequest) -> Result<ExecOutcome> {
        let name = self.bound_name("exec")?;
        if self.state != LifecycleState::Started {
            return Err(PauliError::config(format!(
                "cannot exec in {name} while it is {}",
                self.state
            )));
        }

        let spec = ExecSpec {
            cmd: request.command.clone(),
            env: request.env.clone(),
            working_dir: self.config.working_dir.clone(),
            tty: true,
        };
        let exec_id = self
            .backend
            .create_exec(&name, &spec)
            .await
            .map_err(|e| e.during("create_exec"))?;
        tracing::info!(container = %name, exec = %exec_id, command = ?request.command, "running command");

        let output = self
            .backend
            .start_exec(&exec_id)
            .await
            .map_err(|e| e.during("start_exec"))?;
        self.state = LifecycleState::Executing;

        let exec_relay = relay::spawn("exec", output, self.sinks.clone());
        let stop = !self.settings.keep_running;
        let log_relay =
            stop.then(|| relay::spawn("logs", self.backend.logs(&name), self.sinks.clone()));
        let watcher = CompletionWatcher::new(Arc::clone(&self.backend), name.clone())
            .interval(self.settings.poll_interval)
            .max_polls(self.settings.max_polls)
            .stop_timeout(stop.then_some(self.settings.stop_timeout))
            .spawn(exec_id);

        let report = watcher.await.map_err(|e| PauliError::Stream {
            stream: "exec status".into(),
            message: e.to_string(),
        })?;
        if let Some(failure) = &report.failure {
            tracing::warn!(container = %name, error = %failure, "exec session not seen to completion");
        }

        if report.container_stopped {
            match self.backend.wait_not_running(&name).await {
                Ok(code) => tracing::debug!(container = %name, exit_code = code, "container stopped"),
                Err(e) => tracing::warn!(container = %name, error = %e, "cannot wait for container"),
            }
        }

        let mut output_complete = join_relay("exec", exec_relay).await;
        if let Some(handle) = log_relay {
            if report.container_stopped {
                output_complete &= join_relay("logs", handle).await;
            } else {
                // The log stream only closes once the container stops.
                handle.abort();
            }
        }

        self.state = if report.container_stopped {
            LifecycleState::Stopped
        } else {
            LifecycleState::Started
        };
        let outcome = ExecOutcome {
            exit_code: report.exit_code,
            polls: report.polls,
            container_stopped: report.container_stopped,
            output_complete,
        };
        tracing::info!(
            container = %name,
            exit_code = ?outcome.exit_code,
            polls = outcome.polls,
            state = %self.state,
            "command finished"
        );
        Ok(outcome)
    }

    /// Runs an interactive shell, then kills and removes the container
    /// whatever the session's outcome.
    ///
    /// # Errors
    ///
    /// Returns the start or session error, after teardown has been attempted.
    pub async fn shell(&mut self, session: &dyn InteractiveSession, shell: &str) -> Result<i32> {
        let result = async {
            self.start().await?;
            let name = self.bound_name("shell")?;
            session.run(&name, shell, &self.config.env).await
        }
        .await;

        if let Some(handle) = self.handle.clone() {
            let name = handle.container_name;
            self.stop_quietly(&name, &StopOptions::kill()).await;
            self.remove_quietly(&name).await;
            self.state = LifecycleState::Removed;
            self.handle = None;
        }
        result
    }

    /// Applies the teardown policy.
    ///
    /// # Errors
    ///
    /// Returns an engine error if stopping or removing fails.
    pub async fn teardown(&mut self, policy: Teardown) -> Result<()> {
        let Some(handle) = self.handle.clone() else {
            return Ok(());
        };
        let name = handle.container_name;
        if policy == Teardown::Keep {
            tracing::debug!(container = %name, "keeping container");
            return Ok(());
        }

        match self
            .backend
            .stop_container(&name, &StopOptions::graceful(self.settings.stop_timeout))
            .await
        {
            Ok(()) | Err(EngineError::NotModified) => self.state = LifecycleState::Stopped,
            Err(e) => return Err(e.during("stop_container")),
        }

        if policy == Teardown::Remove {
            match self.backend.remove_container(&name, true).await {
                Ok(()) | Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e.during("remove_container")),
            }
            tracing::info!(container = %name, "container removed");
            self.state = LifecycleState::Removed;
            self.handle = None;
        }
        Ok(())
    }

    /// Returns a handle able to stop the container from another task.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            backend: Arc::clone(&self.backend),
            container: self.config.name.clone(),
            stop_timeout: self.settings.stop_timeout,
        }
    }

    fn bind(&mut self, handle: RuntimeHandle, state: LifecycleState) -> RuntimeHandle {
        self.state = state;
        self.handle = Some(handle.clone());
        handle
    }

    fn bound_name(&self, operation: &str) -> Result<String> {
        self.handle
            .as_ref()
            .map(|h| h.container_name.clone())
            .ok_or_else(|| {
                PauliError::config(format!(
                    "cannot {operation} {}: container not resolved",
                    self.config.name
                ))
            })
    }

    async fn pull(&self) -> Result<()> {
        let mut progress = self.backend.pull_image(&self.config.image);
        let mut out = self.sinks.out.writer();
        while let Some(line) = progress.next().await {
            let line = line.map_err(|e| e.during("pull_image"))?;
            if let Err(e) = out.write_all(format!("{line}\n").as_bytes()).await {
                tracing::warn!(error = %e, "cannot print pull progress");
            }
        }
        if let Err(e) = out.flush().await {
            tracing::warn!(error = %e, "cannot print pull progress");
        }
        tracing::info!(image = %self.config.image, "image pulled");
        Ok(())
    }

    async fn stop_quietly(&self, name: &str, options: &StopOptions) {
        match self.backend.stop_container(name, options).await {
            Ok(()) | Err(EngineError::NotModified | EngineError::NotFound(_)) => {}
            Err(e) => tracing::warn!(container = name, error = %e, "cannot stop container"),
        }
    }

    async fn remove_quietly(&self, name: &str) {
        match self.backend.remove_container(name, true).await {
            Ok(()) | Err(EngineError::NotFound(_)) => {
                tracing::info!(container = name, "container removed");
            }
            Err(e) => tracing::warn!(container = name, error = %e, "cannot remove container"),
        }
    }
}

async fn join_relay(label: &str, handle: tokio::task::JoinHandle<relay::RelayReport>) -> bool {
    match handle.await {
        Ok(report) => report.is_complete(),
        Err(e) => {
            tracing::warn!(stream = label, error = %e, "relay task failed");
            false
        }
    }
}

/// Stops an orchestrated container from outside its flow, e.g. on Ctrl-C.
#[derive(Clone)]
pub struct InterruptHandle {
    backend: Arc<dyn ContainerBackend>,
    container: String,
    stop_timeout: Duration,
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("container", &self.container)
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

impl InterruptHandle {
    /// Stops the container with the short grace period, leaving it present.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the stop fails for another reason than
    /// the container being stopped or gone already.
    pub async fn stop(&self) -> Result<()> {
        tracing::info!(container = %self.container, "interrupted, stopping container");
        match self
            .backend
            .stop_container(&self.container, &StopOptions::graceful(self.stop_timeout))
            .await
        {
            Ok(()) | Err(EngineError::NotModified | EngineError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.during("stop_container")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Call, MockBackend};

    fn config() -> ContainerConfig {
        ContainerConfig {
            name: "proj_build".into(),
            image: "alpine:3.20".into(),
            mounts: Vec::new(),
            env: vec!["A=1".into()],
            entrypoint: None,
            cmd: vec!["sleep".into(), "infinity".into()],
            privileged: true,
            working_dir: "/app".into(),
            tty: true,
        }
    }

    fn orchestrator(mock: &Arc<MockBackend>) -> Orchestrator {
        let (out, _) = relay::Sink::capture();
        Orchestrator::new(
            Arc::clone(mock) as Arc<dyn ContainerBackend>,
            config(),
            OrchestratorSettings {
                poll_interval: Duration::from_millis(1),
                ..OrchestratorSettings::default()
            },
        )
        .with_sinks(Sinks {
            out,
            err: relay::Sink::Stderr,
        })
    }

    #[test]
    fn create_failures_are_classified() {
        assert_eq!(
            CreateFailure::from(EngineError::Conflict("taken".into())),
            CreateFailure::ConflictRecoverable("taken".into())
        );
        assert_eq!(
            CreateFailure::from(EngineError::NotFound("no image".into())),
            CreateFailure::ImageMissing("no image".into())
        );
        assert_eq!(
            CreateFailure::from(EngineError::InvalidParameter("bad mount".into())),
            CreateFailure::Configuration("bad mount".into())
        );
        assert!(matches!(
            CreateFailure::from(EngineError::Fatal("denied".into())),
            CreateFailure::Fatal(_)
        ));
    }

    #[tokio::test]
    async fn conflict_on_create_reuses_existing_container() {
        let mock = Arc::new(MockBackend::new().with_image("alpine:3.20").with_create_race());
        let mut orch = orchestrator(&mock);
        let handle = orch.create_or_resolve().await.unwrap();
        assert_eq!(handle.container_id.as_str(), "existing-proj_build");
        assert_eq!(orch.state(), LifecycleState::Reused);
        assert_eq!(mock.count(|c| matches!(c, Call::Create(_))), 1);
        assert_eq!(mock.count(|c| matches!(c, Call::Inspect(_))), 2);
    }

    #[tokio::test]
    async fn conflict_without_visible_container_is_fatal() {
        let mock = Arc::new(
            MockBackend::new()
                .with_image("alpine:3.20")
                .with_create_failures([EngineError::Conflict("name in use".into())]),
        );
        let err = orchestrator(&mock).create_or_resolve().await.unwrap_err();
        assert!(matches!(err, PauliError::Engine { operation: "create_container", .. }));
    }

    #[tokio::test]
    async fn list_strategy_reuses_without_create() {
        let mock = Arc::new(MockBackend::new().with_container("proj_build", false));
        let mut orch = Orchestrator::new(
            Arc::clone(&mock) as Arc<dyn ContainerBackend>,
            config(),
            OrchestratorSettings {
                strategy: ResolveStrategy::List,
                ..OrchestratorSettings::default()
            },
        );
        orch.create_or_resolve().await.unwrap();
        assert_eq!(orch.state(), LifecycleState::Reused);
        assert_eq!(mock.calls(), vec![Call::List]);
    }

    #[tokio::test]
    async fn invalid_parameter_names_mount_collection() {
        let mock = Arc::new(
            MockBackend::new()
                .with_create_failures([EngineError::InvalidParameter("invalid mount".into())]),
        );
        let err = orchestrator(&mock).create_or_resolve().await.unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("builder.volumes"));
        assert_eq!(mock.count(|c| matches!(c, Call::Create(_))), 1);
    }

    #[tokio::test]
    async fn fatal_create_is_engine_error() {
        let mock = Arc::new(
            MockBackend::new().with_create_failures([EngineError::Fatal("permission denied".into())]),
        );
        let err = orchestrator(&mock).create_or_resolve().await.unwrap_err();
        assert!(matches!(err, PauliError::Engine { operation: "create_container", .. }));
    }

    #[tokio::test]
    async fn exec_before_start_is_rejected() {
        let mock = Arc::new(MockBackend::new().with_image("alpine:3.20"));
        let mut orch = orchestrator(&mock);
        let request = ExecRequest::new(vec!["true".into()]);
        assert!(orch.exec(&request).await.unwrap_err().is_config());
        orch.create_or_resolve().await.unwrap();
        assert!(orch.exec(&request).await.unwrap_err().is_config());
    }

    #[tokio::test]
    async fn teardown_without_handle_is_noop() {
        let mock = Arc::new(MockBackend::new());
        let mut orch = orchestrator(&mock);
        orch.teardown(Teardown::Remove).await.unwrap();
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn interrupt_stops_but_keeps_container() {
        let mock = Arc::new(MockBackend::new().with_container("proj_build", true));
        let orch = orchestrator(&mock);
        orch.interrupt_handle().stop().await.unwrap();
        assert_eq!(mock.is_running("proj_build"), Some(false));
        assert!(mock.exists("proj_build"));
        // A second interrupt on a stopped container is not an error.
        orch.interrupt_handle().stop().await.unwrap();
    }
}
