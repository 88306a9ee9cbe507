//! Unified error types for the pauli workspace.
//!
//! The variants mirror how a failure is handled rather than where it came
//! from: configuration problems abort with an actionable message, engine
//! failures abort with context, and stream failures are only logged.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum PauliError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The build configuration is malformed or incomplete.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The configuration file is not valid YAML for the expected layout.
    #[error("cannot parse {path}: {source}")]
    Yaml {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },

    /// The image is still missing after the pull-and-retry.
    #[error("image {image} not found, even after pulling it")]
    ImageMissing {
        /// Image reference (`name:tag`).
        image: String,
    },

    /// The container engine reported a failure that cannot be recovered.
    #[error("container engine failed during {operation}: {message}")]
    Engine {
        /// Engine operation that failed.
        operation: &'static str,
        /// Engine-provided message.
        message: String,
    },

    /// A relayed stream or the completion watcher lost its source.
    #[error("{stream} stream interrupted: {message}")]
    Stream {
        /// Stream that failed.
        stream: String,
        /// Description of the failure.
        message: String,
    },

    /// The advisory lease on a container name could not be acquired.
    #[error("cannot lease container name {name}: {message}")]
    Lease {
        /// Container name the lease is keyed by.
        name: String,
        /// Why the lease is unavailable.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl PauliError {
    /// Shorthand for a [`PauliError::Config`] error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns whether this error belongs to the configuration class.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Yaml { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PauliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_shorthand_builds_config_variant() {
        let err = PauliError::config("builder.image is empty");
        assert!(err.is_config());
        assert_eq!(
            err.to_string(),
            "invalid configuration: builder.image is empty"
        );
    }

    #[test]
    fn engine_error_is_not_config() {
        let err = PauliError::Engine {
            operation: "start_container",
            message: "daemon unreachable".into(),
        };
        assert!(!err.is_config());
        assert!(err.to_string().contains("start_container"));
    }
}
