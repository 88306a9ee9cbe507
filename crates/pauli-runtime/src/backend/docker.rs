//! Docker Engine backend over the local socket, using `bollard`.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
#[allow(deprecated)]
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{
    ContainerCreateBody, ContainerSummaryStateEnum, HostConfig, Mount as EngineMount,
    MountTypeEnum,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    ListContainersOptionsBuilder, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
    StartContainerOptions, StopContainerOptionsBuilder, WaitContainerOptionsBuilder,
};
use futures_util::StreamExt;
use pauli_common::config::MountKind;
use pauli_common::error::Result;
use pauli_common::types::ContainerId;

use super::{
    ChunkStream, ContainerBackend, ContainerSummary, EngineError, EngineResult, ExecSpec,
    ExecStatus, OutputChunk, ProgressStream, StopOptions, StreamOrigin,
};
use crate::assemble::ContainerConfig;
use crate::mount::Mount;

/// Backend talking to a Docker-compatible daemon.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connects using the platform defaults (`DOCKER_HOST` or the local socket).
    ///
    /// # Errors
    ///
    /// Returns an engine error if the endpoint cannot be configured.
    pub fn connect_local() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| classify(e).during("connect"))?;
        tracing::debug!("docker client configured");
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn create_container(&self, config: &ContainerConfig) -> EngineResult<ContainerId> {
        let body = ContainerCreateBody {
            image: Some(config.image.clone()),
            env: Some(config.env.clone()),
            cmd: Some(config.cmd.clone()),
            entrypoint: config.entrypoint.clone(),
            working_dir: Some(config.working_dir.clone()),
            tty: Some(config.tty),
            attach_stdin: Some(false),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            host_config: Some(HostConfig {
                mounts: Some(config.mounts.iter().map(engine_mount).collect()),
                privileged: Some(config.privileged),
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };
        let response = self
            .docker
            .create_container(
                Some(
                    CreateContainerOptionsBuilder::new()
                        .name(&config.name)
                        .build(),
                ),
                body,
            )
            .await
            .map_err(classify)?;
        for warning in &response.warnings {
            tracing::warn!(container = %config.name, %warning, "engine warning on create");
        }
        Ok(ContainerId::new(response.id))
    }

    async fn inspect_container(&self, name: &str) -> EngineResult<ContainerSummary> {
        let response = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(classify)?;
        Ok(ContainerSummary {
            id: ContainerId::new(response.id.unwrap_or_default()),
            names: response.name.into_iter().collect(),
            running: response
                .state
                .and_then(|state| state.running)
                .unwrap_or(false),
        })
    }

    async fn list_containers(&self) -> EngineResult<Vec<ContainerSummary>> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptionsBuilder::new().all(true).build()))
            .await
            .map_err(classify)?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: ContainerId::new(c.id.unwrap_or_default()),
                names: c.names.unwrap_or_default(),
                running: is_running(c.state),
            })
            .collect())
    }

    async fn start_container(&self, name: &str) -> EngineResult<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await
            .map_err(classify)
    }

    fn pull_image(&self, image: &str) -> ProgressStream {
        let (from_image, tag) = image.rsplit_once(':').unwrap_or((image, "latest"));
        let stream = self
            .docker
            .create_image(
                Some(
                    CreateImageOptionsBuilder::new()
                        .from_image(from_image)
                        .tag(tag)
                        .build(),
                ),
                None,
                None,
            )
            .map(|item| {
                item.map_err(classify).map(|info| {
                    [info.id, info.status, info.progress]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(" ")
                })
            });
        Box::pin(stream)
    }

    #[allow(deprecated)]
    async fn create_exec(&self, container: &str, spec: &ExecSpec) -> EngineResult<String> {
        let options = CreateExecOptions {
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(spec.tty),
            env: Some(spec.env.clone()),
            cmd: Some(spec.cmd.clone()),
            working_dir: Some(spec.working_dir.clone()),
            ..CreateExecOptions::default()
        };
        let created = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(classify)?;
        Ok(created.id)
    }

    #[allow(deprecated)]
    async fn start_exec(&self, exec_id: &str) -> EngineResult<ChunkStream> {
        let options = StartExecOptions {
            detach: false,
            tty: true,
            output_capacity: None,
        };
        match self
            .docker
            .start_exec(exec_id, Some(options))
            .await
            .map_err(classify)?
        {
            StartExecResults::Attached { output, .. } => {
                Ok(Box::pin(output.map(|item| item.map(chunk).map_err(classify))))
            }
            StartExecResults::Detached => Err(EngineError::Fatal(format!(
                "exec {exec_id} started detached, no output to attach"
            ))),
        }
    }

    async fn inspect_exec(&self, exec_id: &str) -> EngineResult<ExecStatus> {
        let response = self.docker.inspect_exec(exec_id).await.map_err(classify)?;
        Ok(ExecStatus {
            running: response.running.unwrap_or(false),
            exit_code: response.exit_code,
        })
    }

    fn logs(&self, container: &str) -> ChunkStream {
        let stream = self
            .docker
            .logs(
                container,
                Some(
                    LogsOptionsBuilder::new()
                        .follow(true)
                        .stdout(true)
                        .stderr(true)
                        .timestamps(true)
                        .build(),
                ),
            )
            .map(|item| item.map(chunk).map_err(classify));
        Box::pin(stream)
    }

    async fn wait_not_running(&self, container: &str) -> EngineResult<i64> {
        let mut stream = self.docker.wait_container(
            container,
            Some(
                WaitContainerOptionsBuilder::new()
                    .condition("not-running")
                    .build(),
            ),
        );
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // A non-zero exit is reported as an error by the client.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(error)) => Err(classify(error)),
            None => Err(EngineError::Fatal(format!(
                "wait stream for {container} closed without a status"
            ))),
        }
    }

    async fn stop_container(&self, container: &str, options: &StopOptions) -> EngineResult<()> {
        let grace = i32::try_from(options.timeout.as_secs()).unwrap_or(i32::MAX);
        let mut builder = StopContainerOptionsBuilder::new().t(grace);
        if let Some(signal) = &options.signal {
            builder = builder.signal(signal);
        }
        self.docker
            .stop_container(container, Some(builder.build()))
            .await
            .map_err(classify)
    }

    async fn remove_container(&self, container: &str, force: bool) -> EngineResult<()> {
        self.docker
            .remove_container(
                container,
                Some(RemoveContainerOptionsBuilder::new().force(force).build()),
            )
            .await
            .map_err(classify)
    }
}

/// Maps a client error onto the engine classification by HTTP status.
fn classify(error: BollardError) -> EngineError {
    match error {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            304 => EngineError::NotModified,
            400 => EngineError::InvalidParameter(message),
            404 => EngineError::NotFound(message),
            409 => EngineError::Conflict(message),
            _ => EngineError::Fatal(format!("{status_code}: {message}")),
        },
        other => EngineError::Fatal(other.to_string()),
    }
}

const fn is_running(state: Option<ContainerSummaryStateEnum>) -> bool {
    matches!(state, Some(ContainerSummaryStateEnum::RUNNING))
}

fn chunk(output: LogOutput) -> OutputChunk {
    let (origin, message) = match output {
        LogOutput::StdOut { message } => (StreamOrigin::Stdout, message),
        LogOutput::StdErr { message } => (StreamOrigin::Stderr, message),
        LogOutput::Console { message } | LogOutput::StdIn { message } => {
            (StreamOrigin::Console, message)
        }
    };
    OutputChunk {
        origin,
        bytes: message.to_vec(),
    }
}

fn engine_mount(mount: &Mount) -> EngineMount {
    let typ = match mount.kind {
        MountKind::Bind => MountTypeEnum::BIND,
    };
    EngineMount {
        target: Some(mount.target.clone()),
        source: Some(mount.source.to_string_lossy().into_owned()),
        typ: Some(typ),
        read_only: Some(mount.read_only),
        ..EngineMount::default()
    }
}
