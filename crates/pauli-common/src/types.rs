//! Domain primitive types used across the pauli workspace.

use std::fmt;

/// Engine-assigned identifier of a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first ten characters, the way engines print IDs.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..10).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a build container, bound once it has been created or found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHandle {
    /// Engine-assigned identifier.
    pub container_id: ContainerId,
    /// Name the container was created with.
    pub container_name: String,
}

/// Lifecycle state of a build container, as seen by one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Configuration assembled, engine not consulted yet.
    Unresolved,
    /// An existing container with the target name is used.
    Reused,
    /// A new container was created.
    Created,
    /// The container is running its dormancy command.
    Started,
    /// An exec session is in progress.
    Executing,
    /// The container has been stopped.
    Stopped,
    /// The container has been removed.
    Removed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved => write!(f, "unresolved"),
            Self::Reused => write!(f, "reused"),
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Executing => write!(f, "executing"),
            Self::Stopped => write!(f, "stopped"),
            Self::Removed => write!(f, "removed"),
        }
    }
}
