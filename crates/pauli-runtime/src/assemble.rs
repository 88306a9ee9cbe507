//! Assembly of the container configuration from a build spec and the
//! caller's overrides.
//!
//! The functional command is never part of the creation config. The
//! container always starts the dormancy command and the work is deferred to
//! an exec session, which is what makes sequential reuse safe.

use std::path::Path;

use pauli_common::config::BuildSpec;
use pauli_common::constants::{CONTAINER_SUFFIX, DORMANCY_COMMAND, IMAGE_PLACEHOLDER, WORKDIR};
use pauli_common::error::{PauliError, Result};

use crate::exec::ExecRequest;
use crate::mount::{self, Mount};

/// Per-invocation values layered on top of the build spec.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Container name; defaults to `<project dir name>_build`.
    pub name: Option<String>,
    /// Extra `KEY=VALUE` entries, appended after the spec's own.
    pub env: Vec<String>,
    /// Entrypoint replacing the image's.
    pub entrypoint: Option<Vec<String>>,
    /// Command to exec once the container runs. Empty in shell mode.
    pub command: Vec<String>,
}

/// Everything the engine needs to create a build container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Target container name.
    pub name: String,
    /// Image reference `name:tag`.
    pub image: String,
    /// Declared volumes followed by the project mount.
    pub mounts: Vec<Mount>,
    /// `KEY=VALUE` entries, in order; the engine keeps the last duplicate.
    pub env: Vec<String>,
    /// Entrypoint override.
    pub entrypoint: Option<Vec<String>>,
    /// Startup command, always the dormancy command.
    pub cmd: Vec<String>,
    /// Whether the container runs privileged.
    pub privileged: bool,
    /// Working directory of the container and of every exec session.
    pub working_dir: String,
    /// Whether a pseudo-terminal is allocated.
    pub tty: bool,
}

/// Result of [`assemble`]: the creation config and the deferred exec.
#[derive(Debug, Clone)]
pub struct Assembled {
    /// Creation config.
    pub config: ContainerConfig,
    /// Work to run once started, if any.
    pub request: Option<ExecRequest>,
}

/// Returns the default container name for a project directory.
///
/// Characters the engine rejects in names are replaced by `_`.
#[must_use]
pub fn default_name(project_dir: &Path) -> String {
    let base = project_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        name.insert_str(0, "project");
    }
    name.push_str(CONTAINER_SUFFIX);
    name
}

/// Merges a build spec with overrides into a container configuration.
///
/// # Errors
///
/// Returns [`PauliError::Config`] if the image or tag is missing, a mount is
/// invalid, an env entry is not `KEY=VALUE`, or the name is not usable.
pub fn assemble(spec: &BuildSpec, overrides: &Overrides, project_dir: &Path) -> Result<Assembled> {
    check_image(spec)?;

    let name = match &overrides.name {
        Some(name) => {
            check_name(name)?;
            name.clone()
        }
        None => default_name(project_dir),
    };

    let env: Vec<String> = spec.env.iter().chain(&overrides.env).cloned().collect();
    for entry in &env {
        check_env(entry)?;
    }

    let mounts = mount::translate(&spec.volumes, project_dir).map_err(|e| match e {
        PauliError::Config { message } => {
            PauliError::config(format!("builder.volumes: {message}"))
        }
        other => other,
    })?;

    let config = ContainerConfig {
        name,
        image: spec.image_reference(),
        mounts,
        env: env.clone(),
        entrypoint: overrides.entrypoint.clone(),
        cmd: DORMANCY_COMMAND.iter().map(ToString::to_string).collect(),
        privileged: spec.privileged,
        working_dir: WORKDIR.to_owned(),
        tty: true,
    };
    tracing::debug!(name = %config.name, image = %config.image, command = ?overrides.command, "container config assembled");

    let request = (!overrides.command.is_empty()).then(|| ExecRequest {
        command: overrides.command.clone(),
        env,
    });
    Ok(Assembled { config, request })
}

fn check_image(spec: &BuildSpec) -> Result<()> {
    if spec.image_name.trim().is_empty() {
        return Err(PauliError::config(
            "builder.image is missing; set the build image in .pauli/config.yaml",
        ));
    }
    if spec.image_name.trim() == IMAGE_PLACEHOLDER {
        return Err(PauliError::config(format!(
            "builder.image is still {IMAGE_PLACEHOLDER}; replace it with your build image"
        )));
    }
    if spec.image_tag.trim().is_empty() {
        return Err(PauliError::config(
            "builder.tag is missing; set the image tag in .pauli/config.yaml",
        ));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<()> {
    let valid = name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(PauliError::config(format!(
            "container name {name:?} must match [a-zA-Z0-9][a-zA-Z0-9_.-]*"
        )))
    }
}

fn check_env(entry: &str) -> Result<()> {
    match entry.split_once('=') {
        Some((key, _)) if !key.is_empty() => Ok(()),
        _ => Err(PauliError::config(format!(
            "environment entry {entry:?} is not KEY=VALUE"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pauli_common::config::MountSpec;

    use super::*;

    fn spec() -> BuildSpec {
        BuildSpec {
            image_name: "alpine".into(),
            image_tag: "latest".into(),
            project_name: "proj".into(),
            ..BuildSpec::default()
        }
    }

    fn project() -> PathBuf {
        PathBuf::from("/work/proj")
    }

    #[test]
    fn default_name_uses_directory_basename() {
        assert_eq!(default_name(Path::new("/work/proj")), "proj_build");
    }

    #[test]
    fn default_name_sanitizes_characters() {
        assert_eq!(default_name(Path::new("/work/my proj")), "my_proj_build");
        assert_eq!(default_name(Path::new("/work/.hidden")), "project.hidden_build");
    }

    #[test]
    fn startup_command_is_dormancy_not_the_work() {
        let overrides = Overrides {
            command: vec!["echo".into(), "hi".into()],
            ..Overrides::default()
        };
        let assembled = assemble(&spec(), &overrides, &project()).unwrap();
        assert_eq!(assembled.config.cmd, vec!["sleep", "infinity"]);
        assert_eq!(assembled.config.working_dir, "/app");
        assert_eq!(assembled.config.image, "alpine:latest");
        let request = assembled.request.unwrap();
        assert_eq!(request.command, vec!["echo", "hi"]);
    }

    #[test]
    fn empty_command_defers_nothing() {
        let assembled = assemble(&spec(), &Overrides::default(), &project()).unwrap();
        assert!(assembled.request.is_none());
        assert_eq!(assembled.config.name, "proj_build");
    }

    #[test]
    fn env_keeps_spec_entries_first_and_duplicates() {
        let mut spec = spec();
        spec.env = vec!["A=1".into(), "B=2".into()];
        let overrides = Overrides {
            env: vec!["A=3".into()],
            command: vec!["true".into()],
            ..Overrides::default()
        };
        let assembled = assemble(&spec, &overrides, &project()).unwrap();
        assert_eq!(assembled.config.env, vec!["A=1", "B=2", "A=3"]);
        assert_eq!(assembled.request.unwrap().env, vec!["A=1", "B=2", "A=3"]);
    }

    #[test]
    fn missing_image_is_config_error() {
        let mut spec = spec();
        spec.image_name.clear();
        let err = assemble(&spec, &Overrides::default(), &project()).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("builder.image"));
    }

    #[test]
    fn missing_tag_is_config_error() {
        let mut spec = spec();
        spec.image_tag = "  ".into();
        let err = assemble(&spec, &Overrides::default(), &project()).unwrap_err();
        assert!(err.to_string().contains("builder.tag"));
    }

    #[test]
    fn init_placeholder_is_config_error() {
        let mut spec = spec();
        spec.image_name = IMAGE_PLACEHOLDER.into();
        assert!(assemble(&spec, &Overrides::default(), &project()).unwrap_err().is_config());
    }

    #[test]
    fn malformed_env_is_config_error() {
        let overrides = Overrides {
            env: vec!["=oops".into()],
            ..Overrides::default()
        };
        assert!(assemble(&spec(), &overrides, &project()).unwrap_err().is_config());
    }

    #[test]
    fn invalid_name_override_is_config_error() {
        let overrides = Overrides {
            name: Some("bad name".into()),
            ..Overrides::default()
        };
        assert!(assemble(&spec(), &overrides, &project()).unwrap_err().is_config());
    }

    #[test]
    fn mount_errors_name_the_volume_collection() {
        let mut spec = spec();
        spec.volumes = vec![MountSpec::bind("/x", "/app")];
        let err = assemble(&spec, &Overrides::default(), &project()).unwrap_err();
        assert!(err.to_string().contains("builder.volumes"));
    }

    #[test]
    fn privileged_flag_is_carried() {
        let mut spec = spec();
        spec.privileged = true;
        let assembled = assemble(&spec, &Overrides::default(), &project()).unwrap();
        assert!(assembled.config.privileged);
    }
}
