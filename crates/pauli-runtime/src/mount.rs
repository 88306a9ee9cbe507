//! Translation of declared volumes into the mount set of a build container.
//!
//! Declared volumes keep their order and read/write mode. The project
//! directory is always appended last, read-write, at [`WORKDIR`], so that
//! diagnostics can refer to "mount #i" unambiguously.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use pauli_common::config::{MountKind, MountSpec};
use pauli_common::constants::WORKDIR;
use pauli_common::error::{PauliError, Result};

/// A validated mount, ready to hand to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Mount kind.
    pub kind: MountKind,
    /// Absolute host path.
    pub source: PathBuf,
    /// Absolute path inside the container.
    pub target: String,
    /// Whether the container sees the mount read-only.
    pub read_only: bool,
}

impl Mount {
    /// The implicit read-write mount of the project directory.
    #[must_use]
    pub fn project(project_dir: &Path) -> Self {
        Self {
            kind: MountKind::Bind,
            source: project_dir.to_path_buf(),
            target: WORKDIR.to_owned(),
            read_only: false,
        }
    }
}

/// Builds the mount set from declared volumes plus the project directory.
///
/// Relative sources are resolved against `project_dir`.
///
/// # Errors
///
/// Returns [`PauliError::Config`] if a mount has an empty source or target,
/// a relative target, or a target already used by an earlier mount or by
/// the project mount.
pub fn translate(volumes: &[MountSpec], project_dir: &Path) -> Result<Vec<Mount>> {
    let mut seen: HashSet<String> = HashSet::from([WORKDIR.to_owned()]);
    let mut mounts = Vec::with_capacity(volumes.len() + 1);

    for (index, volume) in volumes.iter().enumerate() {
        let number = index + 1;
        check_paths(number, volume)?;

        let target = normalize_target(&volume.target);
        if seen.contains(&target) {
            return Err(PauliError::config(format!(
                "mount #{number}: target {target} is already used{}",
                if target == WORKDIR {
                    " by the project directory mount"
                } else {
                    " by another volume"
                }
            )));
        }
        let _ = seen.insert(target.clone());

        let source = resolve_source(&volume.source, project_dir);
        tracing::info!(
            mount = number,
            source = %source.display(),
            destination = %target,
            kind = %volume.kind,
            read_only = volume.read_only,
            "volume mounted"
        );
        mounts.push(Mount {
            kind: volume.kind,
            source,
            target,
            read_only: volume.read_only,
        });
    }

    let project = Mount::project(project_dir);
    tracing::info!(
        mount = mounts.len() + 1,
        source = %project.source.display(),
        destination = WORKDIR,
        kind = %project.kind,
        "project directory mounted"
    );
    mounts.push(project);
    Ok(mounts)
}

fn check_paths(number: usize, volume: &MountSpec) -> Result<()> {
    if volume.source.trim().is_empty() {
        return Err(PauliError::config(format!(
            "mount #{number}: source is empty"
        )));
    }
    if volume.target.trim().is_empty() {
        return Err(PauliError::config(format!(
            "mount #{number}: target is empty"
        )));
    }
    if !volume.target.starts_with('/') {
        return Err(PauliError::config(format!(
            "mount #{number}: target {} must be an absolute container path",
            volume.target
        )));
    }
    Ok(())
}

/// Lexical form of an absolute container path: no empty, `.` or `..`
/// segments and no trailing slash.
fn normalize_target(target: &str) -> String {
    let mut segments: Vec<String> = Vec::new();
    for component in Path::new(target).components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::ParentDir => {
                let _ = segments.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    format!("/{}", segments.join("/"))
}

fn resolve_source(source: &str, project_dir: &Path) -> PathBuf {
    let path = Path::new(source);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_dir.join(path.strip_prefix(".").unwrap_or(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> PathBuf {
        PathBuf::from("/home/dev/proj")
    }

    #[test]
    fn empty_volumes_yield_only_project_mount() {
        let mounts = translate(&[], &project()).unwrap();
        assert_eq!(mounts, vec![Mount::project(&project())]);
        assert_eq!(mounts[0].target, "/app");
        assert!(!mounts[0].read_only);
    }

    #[test]
    fn declared_volumes_come_first_in_order() {
        let volumes = vec![
            MountSpec::bind("/var/run/docker.sock", "/var/run/docker.sock"),
            MountSpec {
                read_only: true,
                ..MountSpec::bind("/etc/ssl", "/etc/ssl")
            },
        ];
        let mounts = translate(&volumes, &project()).unwrap();
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[0].target, "/var/run/docker.sock");
        assert!(!mounts[0].read_only);
        assert_eq!(mounts[1].target, "/etc/ssl");
        assert!(mounts[1].read_only);
        assert_eq!(mounts[2].target, "/app");
    }

    #[test]
    fn collision_with_project_mount_is_config_error() {
        let volumes = vec![MountSpec::bind("/tmp/elsewhere", "/app/")];
        let err = translate(&volumes, &project()).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("mount #1"));
        assert!(err.to_string().contains("project directory"));
    }

    #[test]
    fn equivalent_spellings_of_project_target_collide() {
        for target in ["/app/.", "//app", "/app//", "/tmp/../app"] {
            let err = translate(&[MountSpec::bind("/tmp/elsewhere", target)], &project())
                .unwrap_err();
            assert!(err.to_string().contains("project directory"), "{target}");
        }
    }

    #[test]
    fn targets_are_normalized() {
        let mounts = translate(&[MountSpec::bind("/a", "/data/./cache/")], &project()).unwrap();
        assert_eq!(mounts[0].target, "/data/cache");
        assert_eq!(normalize_target("/"), "/");
    }

    #[test]
    fn duplicate_declared_targets_are_rejected() {
        let volumes = vec![
            MountSpec::bind("/a", "/data"),
            MountSpec::bind("/b", "/data"),
        ];
        let err = translate(&volumes, &project()).unwrap_err();
        assert!(err.to_string().contains("mount #2"));
    }

    #[test]
    fn relative_target_is_rejected() {
        let err = translate(&[MountSpec::bind("/a", "data")], &project()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn empty_source_is_rejected() {
        let err = translate(&[MountSpec::bind(" ", "/data")], &project()).unwrap_err();
        assert!(err.to_string().contains("source is empty"));
    }

    #[test]
    fn relative_source_resolves_against_project() {
        let mounts = translate(&[MountSpec::bind("./cache", "/cache")], &project()).unwrap();
        assert_eq!(mounts[0].source, PathBuf::from("/home/dev/proj/cache"));
    }

    #[test]
    fn distinct_targets_never_fail() {
        let volumes: Vec<_> = (0..16)
            .map(|i| MountSpec::bind(format!("/src/{i}"), format!("/dst/{i}")))
            .collect();
        let mounts = translate(&volumes, &project()).unwrap();
        assert_eq!(mounts.len(), 17);
    }
}
