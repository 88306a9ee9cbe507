//! `pauli shell` — interactive session in the build container.

use clap::{Args, ValueEnum};
use pauli_common::constants::{LEASE_TIMEOUT, lease_dir};
use pauli_runtime::assemble::{Overrides, assemble};
use pauli_runtime::backend;
use pauli_runtime::lease::Lease;
use pauli_runtime::orchestrator::{Orchestrator, OrchestratorSettings};
use pauli_runtime::shell::DockerCliSession;

use crate::project::Project;

/// Shells the build container is expected to provide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ShellKind {
    /// POSIX shell.
    #[default]
    Sh,
    /// Bourne-again shell.
    Bash,
}

impl ShellKind {
    /// Program name inside the container.
    pub const fn program(self) -> &'static str {
        match self {
            Self::Sh => "sh",
            Self::Bash => "bash",
        }
    }
}

/// Arguments for the `shell` command.
#[derive(Args, Debug)]
pub struct ShellArgs {
    /// Shell to start.
    #[arg(value_enum, default_value_t = ShellKind::Sh)]
    pub shell: ShellKind,

    /// Environment entry passed to the shell (repeatable).
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Container name (default: <project dir>_build).
    #[arg(long)]
    pub name: Option<String>,
}

/// Executes the `shell` command.
///
/// The container is killed and removed when the shell exits, whatever its
/// exit status.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the container cannot
/// be provisioned, or the `docker` client is not installed.
pub async fn execute(project: &Project, args: ShellArgs) -> anyhow::Result<i32> {
    project.check_files(false)?;
    let spec = project.load_spec()?;
    let overrides = Overrides {
        name: args.name,
        env: args.env,
        ..Overrides::default()
    };
    let config = assemble(&spec, &overrides, &project.dir)?.config;
    let session = DockerCliSession::locate()?;

    let backend = backend::connect()?;
    let _lease = Lease::acquire(&lease_dir(), &config.name, LEASE_TIMEOUT).await?;
    let mut orchestrator = Orchestrator::new(backend, config, OrchestratorSettings::default());
    let _ = orchestrator.create_or_resolve().await?;

    let status = orchestrator.shell(&session, args.shell.program()).await?;
    tracing::debug!(status, "interactive session ended");
    Ok(status)
}
