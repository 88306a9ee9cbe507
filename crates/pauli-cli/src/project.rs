//! Location and sanity checks of the project's `.pauli` files.

use std::path::{Path, PathBuf};

use anyhow::Context;
use pauli_common::config::{BuildSpec, load_build_spec};
use pauli_common::constants::{PROJECT_DIR, SCRIPT_FILE};

/// The project pauli was invoked in.
#[derive(Debug, Clone)]
pub struct Project {
    /// Project root, mounted at `/app`.
    pub dir: PathBuf,
    /// Build configuration file.
    pub config: PathBuf,
}

impl Project {
    /// Uses the current directory as project root.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory is unreadable.
    pub fn current(config: &Path) -> anyhow::Result<Self> {
        let dir = std::env::current_dir().context("cannot read the current directory")?;
        Ok(Self::at(dir, config))
    }

    /// Uses `dir` as project root; a relative `config` is resolved against it.
    pub fn at(dir: PathBuf, config: &Path) -> Self {
        let config = dir.join(config);
        Self { dir, config }
    }

    /// Path of the project script.
    pub fn script(&self) -> PathBuf {
        self.dir.join(SCRIPT_FILE)
    }

    /// Ensures the `.pauli` directory and the configuration exist, plus the
    /// script when `with_script` is set.
    ///
    /// # Errors
    ///
    /// Names the first missing file and how to provide it.
    pub fn check_files(&self, with_script: bool) -> anyhow::Result<()> {
        let mut required = vec![self.dir.join(PROJECT_DIR), self.config.clone()];
        if with_script {
            required.push(self.script());
        }
        for path in required {
            if !path.exists() {
                anyhow::bail!(
                    "{} is missing: add it manually or run `pauli init` to initiate your project",
                    path.display()
                );
            }
        }
        Ok(())
    }

    /// Loads the build configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_spec(&self) -> anyhow::Result<BuildSpec> {
        let spec = load_build_spec(&self.config)?;
        tracing::debug!(config = %self.config.display(), image = %spec.image_reference(), "build configuration loaded");
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(with_script: bool) -> (tempfile::TempDir, Project) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".pauli")).unwrap();
        std::fs::write(
            dir.path().join(".pauli/config.yaml"),
            "builder:\n  image: alpine\n  tag: \"3.20\"\nname: demo\n",
        )
        .unwrap();
        if with_script {
            std::fs::write(dir.path().join(".pauli/pauli.sh"), "#!/bin/sh\n").unwrap();
        }
        let project = Project::at(dir.path().to_path_buf(), Path::new(".pauli/config.yaml"));
        (dir, project)
    }

    #[test]
    fn complete_project_passes_checks() {
        let (_dir, project) = project(true);
        project.check_files(true).unwrap();
        assert_eq!(project.load_spec().unwrap().image_reference(), "alpine:3.20");
    }

    #[test]
    fn missing_script_is_actionable() {
        let (_dir, project) = project(false);
        project.check_files(false).unwrap();
        let err = project.check_files(true).unwrap_err().to_string();
        assert!(err.contains("pauli.sh is missing"));
        assert!(err.contains("pauli init"));
    }

    #[test]
    fn missing_project_dir_is_reported_first() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::at(dir.path().to_path_buf(), Path::new(".pauli/config.yaml"));
        let err = project.check_files(true).unwrap_err().to_string();
        assert!(err.contains(".pauli is missing"));
    }

    #[test]
    fn absolute_config_path_is_kept() {
        let project = Project::at(PathBuf::from("/work/proj"), Path::new("/etc/pauli.yaml"));
        assert_eq!(project.config, Path::new("/etc/pauli.yaml"));
    }
}
