//! Build configuration model and its YAML loader.
//!
//! The on-disk layout of `.pauli/config.yaml` nests the container settings
//! under a `builder` key. [`BuildSpec`] flattens it into the value the
//! runtime consumes.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PauliError, Result};

/// Kind of a declared mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// Host path exposed inside the container.
    #[default]
    Bind,
}

impl fmt::Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind => write!(f, "bind"),
        }
    }
}

/// A volume declared in the build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Mount kind, only `bind` is supported.
    #[serde(rename = "type", default)]
    pub kind: MountKind,
    /// Host path.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    /// Whether the container sees the mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

impl MountSpec {
    /// Creates a read-write bind mount.
    #[must_use]
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Bind,
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }
}

/// Everything needed to provision a build container, loaded once per invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSpec {
    /// Image repository, e.g. `alpine`.
    pub image_name: String,
    /// Image tag, e.g. `latest`.
    pub image_tag: String,
    /// Whether the container runs privileged.
    pub privileged: bool,
    /// Declared volumes, in declaration order.
    pub volumes: Vec<MountSpec>,
    /// Environment entries (`KEY=VALUE`) applied to every invocation.
    pub env: Vec<String>,
    /// Project name.
    pub project_name: String,
}

impl BuildSpec {
    /// Returns the image reference `name:tag`.
    #[must_use]
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image_name, self.image_tag)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    builder: BuilderSection,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BuilderSection {
    #[serde(default)]
    image: String,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    privileged: bool,
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    volumes: Vec<MountSpec>,
}

impl From<ConfigFile> for BuildSpec {
    fn from(file: ConfigFile) -> Self {
        Self {
            image_name: file.builder.image,
            image_tag: file.builder.tag,
            privileged: file.builder.privileged,
            volumes: file.builder.volumes,
            env: file.builder.env,
            project_name: file.name,
        }
    }
}

/// Parses a build configuration from YAML text.
///
/// Missing `image` or `tag` are accepted here and rejected when the
/// container configuration is assembled.
///
/// # Errors
///
/// Returns [`PauliError::Yaml`] if the document does not match the layout.
pub fn parse_build_spec(content: &str, origin: &Path) -> Result<BuildSpec> {
    let file: ConfigFile = serde_yaml::from_str(content).map_err(|source| PauliError::Yaml {
        path: origin.to_path_buf(),
        source,
    })?;
    Ok(file.into())
}

/// Loads the build configuration from a YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_build_spec(path: &Path) -> Result<BuildSpec> {
    tracing::debug!(path = %path.display(), "loading build configuration");
    let content = std::fs::read_to_string(path).map_err(|source| PauliError::Io {
        path: PathBuf::from(path),
        source,
    })?;
    parse_build_spec(&content, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
builder:
  image: golang
  tag: '1.22'
  privileged: true
  volumes:
    - type: bind
      source: /var/run/docker.sock
      target: /var/run/docker.sock
    - type: bind
      source: ./cache
      target: /cache
      read_only: true
name: myproject
";

    #[test]
    fn parses_full_document() {
        let spec = parse_build_spec(SAMPLE, Path::new("config.yaml")).unwrap();
        assert_eq!(spec.image_name, "golang");
        assert_eq!(spec.image_tag, "1.22");
        assert!(spec.privileged);
        assert_eq!(spec.project_name, "myproject");
        assert_eq!(spec.volumes.len(), 2);
        assert_eq!(
            spec.volumes[0],
            MountSpec::bind("/var/run/docker.sock", "/var/run/docker.sock")
        );
        assert!(spec.volumes[1].read_only);
        assert_eq!(spec.image_reference(), "golang:1.22");
    }

    #[test]
    fn privileged_defaults_to_false() {
        let spec = parse_build_spec(
            "builder:\n  image: alpine\n  tag: latest\nname: p\n",
            Path::new("config.yaml"),
        )
        .unwrap();
        assert!(!spec.privileged);
        assert!(spec.volumes.is_empty());
        assert!(spec.env.is_empty());
    }

    #[test]
    fn missing_image_parses_as_empty() {
        let spec =
            parse_build_spec("builder:\n  tag: latest\n", Path::new("config.yaml")).unwrap();
        assert!(spec.image_name.is_empty());
    }

    #[test]
    fn unknown_volume_type_is_rejected() {
        let doc = "builder:\n  image: a\n  tag: b\n  volumes:\n    - type: tmpfs\n      source: x\n      target: /x\n";
        let err = parse_build_spec(doc, Path::new("config.yaml")).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).expect("write");
        let spec = load_build_spec(&path).expect("load");
        assert_eq!(spec.image_name, "golang");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_build_spec(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, PauliError::Io { .. }));
    }
}
