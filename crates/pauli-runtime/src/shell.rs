//! Interactive shells inside a build container.
//!
//! An interactive session needs the caller's terminal, which the engine API
//! cannot hand over, so the engine's own CLI is spawned with inherited stdio.

use std::path::PathBuf;
use std::process::Command;

use async_trait::async_trait;
use pauli_common::error::{PauliError, Result};

/// A terminal session attached to a running container.
#[async_trait]
pub trait InteractiveSession: Send + Sync {
    /// Runs `shell` in `container` until the user leaves it, returning the
    /// session's exit status.
    async fn run(&self, container: &str, shell: &str, env: &[String]) -> Result<i32>;
}

/// Session driven by the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerCliSession {
    program: PathBuf,
}

impl DockerCliSession {
    /// Locates the `docker` client on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no `docker` executable is found.
    pub fn locate() -> Result<Self> {
        let program = which::which("docker").map_err(|e| {
            PauliError::config(format!(
                "interactive mode needs the docker client on PATH: {e}"
            ))
        })?;
        tracing::debug!(program = %program.display(), "docker client located");
        Ok(Self { program })
    }

    /// Uses an explicit client executable.
    #[must_use]
    pub const fn with_program(program: PathBuf) -> Self {
        Self { program }
    }
}

/// Arguments of `docker exec` for an interactive shell.
#[must_use]
pub fn exec_args(container: &str, shell: &str, env: &[String]) -> Vec<String> {
    let mut args = vec!["exec".to_owned(), "--privileged".to_owned(), "-ti".to_owned()];
    for entry in env {
        args.push("--env".to_owned());
        args.push(entry.clone());
    }
    args.push(container.to_owned());
    args.push(shell.to_owned());
    args
}

#[async_trait]
impl InteractiveSession for DockerCliSession {
    async fn run(&self, container: &str, shell: &str, env: &[String]) -> Result<i32> {
        let program = self.program.clone();
        let args = exec_args(container, shell, env);
        tracing::info!(container, shell, "starting interactive session");

        let status = tokio::task::spawn_blocking(move || Command::new(&program).args(&args).status())
            .await
            .map_err(|e| PauliError::Engine {
                operation: "interactive session",
                message: e.to_string(),
            })?
            .map_err(|source| PauliError::Io {
                path: self.program.clone(),
                source,
            })?;

        Ok(exit_code(status))
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_args_pass_env_before_container() {
        let args = exec_args("proj_build", "bash", &["A=1".into(), "B=2".into()]);
        assert_eq!(
            args,
            [
                "exec",
                "--privileged",
                "-ti",
                "--env",
                "A=1",
                "--env",
                "B=2",
                "proj_build",
                "bash"
            ]
        );
    }

    #[tokio::test]
    async fn session_reports_child_exit_code() {
        let session = DockerCliSession::with_program(PathBuf::from("/bin/sh"));
        // `/bin/sh exec ...` fails to find a script named `exec`.
        let code = session.run("c", "sh", &[]).await.unwrap();
        assert_ne!(code, 0);
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let session = DockerCliSession::with_program(PathBuf::from("/nonexistent/docker"));
        let err = session.run("c", "sh", &[]).await.unwrap_err();
        assert!(matches!(err, PauliError::Io { .. }));
    }
}
