//! In-memory container backend for tests and dry runs.
//!
//! Simulates the engine behaviors the orchestrator depends on: name
//! conflicts, missing images, idempotent start, exec sessions that run for a
//! configurable number of polls, log streams that follow the container until
//! it stops, and stop/remove. Every call is recorded so tests can assert on
//! exactly what was asked of the engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use pauli_common::types::ContainerId;
use uuid::Uuid;

use super::{
    ChunkStream, ContainerBackend, ContainerSummary, EngineError, EngineResult, ExecSpec,
    ExecStatus, OutputChunk, ProgressStream, StopOptions,
};
use crate::assemble::ContainerConfig;

const FOLLOW_INTERVAL: Duration = Duration::from_millis(5);

/// An engine call recorded by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `create_container` for a name.
    Create(String),
    /// `inspect_container` for a name.
    Inspect(String),
    /// `list_containers`.
    List,
    /// `start_container` for a name.
    Start(String),
    /// `pull_image` for an image reference.
    Pull(String),
    /// `create_exec` with the command.
    CreateExec(String, Vec<String>),
    /// `start_exec` for an exec ID.
    StartExec(String),
    /// `inspect_exec` for an exec ID.
    InspectExec(String),
    /// `logs` for a container.
    Logs(String),
    /// `wait_not_running` for a container.
    Wait(String),
    /// `stop_container` with the signal, if any.
    Stop(String, Option<String>),
    /// `remove_container` with the force flag.
    Remove(String, bool),
}

#[derive(Debug, Clone)]
struct MockContainer {
    id: ContainerId,
    running: bool,
    config: Option<ContainerConfig>,
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    images: HashSet<String>,
    create_failures: VecDeque<EngineError>,
    create_race: bool,
    execs: HashMap<String, u32>,
    calls: Vec<Call>,
}

/// Scriptable in-memory backend.
#[derive(Debug)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    exec_output: Vec<u8>,
    exec_exit_code: i64,
    exec_running_polls: u32,
    exec_stream_breaks: bool,
    pull_fails: bool,
    log_output: Vec<u8>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Creates a backend with no containers and no images.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            exec_output: Vec::new(),
            exec_exit_code: 0,
            exec_running_polls: 0,
            exec_stream_breaks: false,
            pull_fails: false,
            log_output: Vec::new(),
        }
    }

    /// Makes an image available locally.
    #[must_use]
    pub fn with_image(self, image: impl Into<String>) -> Self {
        let _ = self.lock().images.insert(image.into());
        self
    }

    /// Registers an existing container.
    #[must_use]
    pub fn with_container(self, name: impl Into<String>, running: bool) -> Self {
        let name = name.into();
        let _ = self.lock().containers.insert(
            name.clone(),
            MockContainer {
                id: ContainerId::new(format!("existing-{name}")),
                running,
                config: None,
            },
        );
        self
    }

    /// Makes the next `create_container` calls fail with these errors, in order.
    #[must_use]
    pub fn with_create_failures(self, failures: impl IntoIterator<Item = EngineError>) -> Self {
        self.lock().create_failures.extend(failures);
        self
    }

    /// Simulates another invocation creating the container between this
    /// one's lookup and its create call.
    #[must_use]
    pub fn with_create_race(self) -> Self {
        self.lock().create_race = true;
        self
    }

    /// Sets the bytes an exec session prints.
    #[must_use]
    pub fn with_exec_output(mut self, output: impl Into<Vec<u8>>) -> Self {
        self.exec_output = output.into();
        self
    }

    /// Sets the exit code of exec sessions.
    #[must_use]
    pub const fn with_exec_exit_code(mut self, code: i64) -> Self {
        self.exec_exit_code = code;
        self
    }

    /// Number of status polls an exec session reports as still running.
    #[must_use]
    pub const fn with_exec_running_polls(mut self, polls: u32) -> Self {
        self.exec_running_polls = polls;
        self
    }

    /// Makes the attached exec stream fail after its output.
    #[must_use]
    pub const fn with_broken_exec_stream(mut self) -> Self {
        self.exec_stream_breaks = true;
        self
    }

    /// Makes image pulls fail.
    #[must_use]
    pub const fn with_failing_pull(mut self) -> Self {
        self.pull_fails = true;
        self
    }

    /// Sets the bytes the container log stream yields once the container
    /// stops.
    #[must_use]
    pub fn with_log_output(mut self, output: impl Into<Vec<u8>>) -> Self {
        self.log_output = output.into();
        self
    }

    /// Returns every call received so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Counts the recorded calls matching a predicate.
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Returns whether the named container exists and runs.
    pub fn is_running(&self, name: &str) -> Option<bool> {
        self.lock().containers.get(name).map(|c| c.running)
    }

    /// Returns whether the named container exists.
    pub fn exists(&self, name: &str) -> bool {
        self.lock().containers.contains_key(name)
    }

    /// Returns the configuration a container was created with.
    pub fn created_config(&self, name: &str) -> Option<ContainerConfig> {
        self.lock()
            .containers
            .get(name)
            .and_then(|c| c.config.clone())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock_state(&self.state)
    }

    fn record(&self, call: Call) -> MutexGuard<'_, MockState> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }
}

fn lock_state(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ContainerBackend for MockBackend {
    async fn create_container(&self, config: &ContainerConfig) -> EngineResult<ContainerId> {
        let mut state = self.record(Call::Create(config.name.clone()));
        if let Some(failure) = state.create_failures.pop_front() {
            return Err(failure);
        }
        if std::mem::take(&mut state.create_race) {
            let _ = state.containers.insert(
                config.name.clone(),
                MockContainer {
                    id: ContainerId::new(format!("existing-{}", config.name)),
                    running: false,
                    config: None,
                },
            );
        }
        if state.containers.contains_key(&config.name) {
            return Err(EngineError::Conflict(format!(
                "container name {} is already in use",
                config.name
            )));
        }
        if !state.images.contains(&config.image) {
            return Err(EngineError::NotFound(format!(
                "No such image: {}",
                config.image
            )));
        }
        let id = ContainerId::new(format!("mock-{}", Uuid::new_v4().simple()));
        let _ = state.containers.insert(
            config.name.clone(),
            MockContainer {
                id: id.clone(),
                running: false,
                config: Some(config.clone()),
            },
        );
        Ok(id)
    }

    async fn inspect_container(&self, name: &str) -> EngineResult<ContainerSummary> {
        let state = self.record(Call::Inspect(name.to_owned()));
        state
            .containers
            .get(name)
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![format!("/{name}")],
                running: c.running,
            })
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))
    }

    async fn list_containers(&self) -> EngineResult<Vec<ContainerSummary>> {
        let state = self.record(Call::List);
        Ok(state
            .containers
            .iter()
            .map(|(name, c)| ContainerSummary {
                id: c.id.clone(),
                names: vec![format!("/{name}")],
                running: c.running,
            })
            .collect())
    }

    async fn start_container(&self, name: &str) -> EngineResult<()> {
        let mut state = self.record(Call::Start(name.to_owned()));
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {name}")))?;
        if container.running {
            return Err(EngineError::NotModified);
        }
        container.running = true;
        Ok(())
    }

    fn pull_image(&self, image: &str) -> ProgressStream {
        let mut state = self.record(Call::Pull(image.to_owned()));
        if self.pull_fails {
            let failed: Vec<EngineResult<String>> = vec![Err(EngineError::Fatal(format!(
                "pull access denied for {image}"
            )))];
            return Box::pin(stream::iter(failed));
        }
        let _ = state.images.insert(image.to_owned());
        let progress: Vec<EngineResult<String>> = vec![
            Ok(format!("Pulling from {image}")),
            Ok(format!("Status: Downloaded newer image for {image}")),
        ];
        Box::pin(stream::iter(progress))
    }

    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> EngineResult<String> {
        let mut state = self.record(Call::CreateExec(container.to_owned(), spec.cmd.clone()));
        match state.containers.get(container) {
            Some(c) if c.running => {}
            Some(_) => {
                return Err(EngineError::Conflict(format!(
                    "container {container} is not running"
                )));
            }
            None => {
                return Err(EngineError::NotFound(format!(
                    "No such container: {container}"
                )));
            }
        }
        let exec_id = format!("exec-{}", Uuid::new_v4().simple());
        let _ = state
            .execs
            .insert(exec_id.clone(), self.exec_running_polls);
        Ok(exec_id)
    }

    async fn start_exec(&self, exec_id: &str) -> EngineResult<ChunkStream> {
        let state = self.record(Call::StartExec(exec_id.to_owned()));
        if !state.execs.contains_key(exec_id) {
            return Err(EngineError::NotFound(format!("No such exec instance: {exec_id}")));
        }
        let mut items: Vec<EngineResult<OutputChunk>> = Vec::new();
        if !self.exec_output.is_empty() {
            items.push(Ok(OutputChunk::console(self.exec_output.clone())));
        }
        if self.exec_stream_breaks {
            items.push(Err(EngineError::Fatal("broken pipe".into())));
        }
        Ok(Box::pin(stream::iter(items)))
    }

    async fn inspect_exec(&self, exec_id: &str) -> EngineResult<ExecStatus> {
        let mut state = self.record(Call::InspectExec(exec_id.to_owned()));
        let remaining = state
            .execs
            .get_mut(exec_id)
            .ok_or_else(|| EngineError::NotFound(format!("No such exec instance: {exec_id}")))?;
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(ExecStatus {
                running: true,
                exit_code: None,
            });
        }
        Ok(ExecStatus {
            running: false,
            exit_code: Some(self.exec_exit_code),
        })
    }

    fn logs(&self, container: &str) -> ChunkStream {
        drop(self.record(Call::Logs(container.to_owned())));
        // Follows the container: the output arrives once it is no longer
        // running, then the stream closes.
        let tail = (!self.log_output.is_empty()).then(|| self.log_output.clone());
        let follow = (Arc::clone(&self.state), container.to_owned(), tail);
        Box::pin(stream::unfold(follow, |(state, name, tail)| async move {
            loop {
                let running = {
                    let guard = lock_state(&state);
                    guard.containers.get(&name).is_some_and(|c| c.running)
                };
                if !running {
                    break;
                }
                tokio::time::sleep(FOLLOW_INTERVAL).await;
            }
            let chunk: EngineResult<OutputChunk> = Ok(OutputChunk::console(tail?));
            Some((chunk, (state, name, None)))
        }))
    }

    async fn wait_not_running(&self, container: &str) -> EngineResult<i64> {
        drop(self.record(Call::Wait(container.to_owned())));
        loop {
            let running = self.lock().containers.get(container).map(|c| c.running);
            match running {
                None => {
                    return Err(EngineError::NotFound(format!(
                        "No such container: {container}"
                    )));
                }
                Some(false) => return Ok(137),
                Some(true) => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    }

    async fn stop_container(&self, container: &str, options: &StopOptions) -> EngineResult<()> {
        let mut state = self.record(Call::Stop(container.to_owned(), options.signal.clone()));
        let entry = state
            .containers
            .get_mut(container)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {container}")))?;
        if !entry.running {
            return Err(EngineError::NotModified);
        }
        entry.running = false;
        Ok(())
    }

    async fn remove_container(&self, container: &str, force: bool) -> EngineResult<()> {
        let mut state = self.record(Call::Remove(container.to_owned(), force));
        match state.containers.get(container) {
            None => Err(EngineError::NotFound(format!(
                "No such container: {container}"
            ))),
            Some(c) if c.running && !force => Err(EngineError::Conflict(format!(
                "container {container} is running, stop it first or force removal"
            ))),
            Some(_) => {
                let _ = state.containers.remove(container);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_twice_reports_not_modified() {
        let backend = MockBackend::new().with_container("c", false);
        backend.start_container("c").await.unwrap();
        assert_eq!(
            backend.start_container("c").await.unwrap_err(),
            EngineError::NotModified
        );
    }

    #[tokio::test]
    async fn create_without_image_is_not_found() {
        let backend = MockBackend::new();
        let config = crate::assemble::ContainerConfig {
            name: "c".into(),
            image: "alpine:latest".into(),
            mounts: Vec::new(),
            env: Vec::new(),
            entrypoint: None,
            cmd: vec!["sleep".into(), "infinity".into()],
            privileged: false,
            working_dir: "/app".into(),
            tty: true,
        };
        assert!(matches!(
            backend.create_container(&config).await,
            Err(EngineError::NotFound(_))
        ));
        assert_eq!(backend.calls(), vec![Call::Create("c".into())]);
    }

    #[tokio::test]
    async fn logs_follow_until_container_stops() {
        use futures_util::StreamExt;

        let backend = MockBackend::new()
            .with_container("c", true)
            .with_log_output("bye\n");
        let mut logs = backend.logs("c");
        assert!(
            tokio::time::timeout(Duration::from_millis(30), logs.next())
                .await
                .is_err()
        );

        backend
            .stop_container("c", &StopOptions::kill())
            .await
            .unwrap();
        let chunk = logs.next().await.unwrap().unwrap();
        assert_eq!(chunk.bytes, b"bye\n");
        assert!(logs.next().await.is_none());
    }

    #[tokio::test]
    async fn exec_runs_for_configured_polls() {
        let backend = MockBackend::new()
            .with_container("c", true)
            .with_exec_running_polls(2)
            .with_exec_exit_code(4);
        let spec = ExecSpec {
            cmd: vec!["true".into()],
            env: Vec::new(),
            working_dir: "/app".into(),
            tty: true,
        };
        let exec_id = backend.create_exec("c", &spec).await.unwrap();
        assert!(backend.inspect_exec(&exec_id).await.unwrap().running);
        assert!(backend.inspect_exec(&exec_id).await.unwrap().running);
        let done = backend.inspect_exec(&exec_id).await.unwrap();
        assert!(!done.running);
        assert_eq!(done.exit_code, Some(4));
    }
}
