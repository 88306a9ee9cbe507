//! Lookup of an existing container by name.
//!
//! Absence is a normal outcome: a missing container resolves to `None`,
//! only engine failures are errors.

use pauli_common::error::Result;
use pauli_common::types::RuntimeHandle;

use crate::backend::{ContainerBackend, EngineError};

/// How the engine is asked about a container name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolveStrategy {
    /// Inspect the container by name; not-found means absent.
    #[default]
    Inspect,
    /// List every container, stopped ones included, and match the name.
    List,
}

/// Looks up a container by name.
///
/// # Errors
///
/// Returns an engine error if the engine cannot be queried.
pub async fn lookup(
    backend: &dyn ContainerBackend,
    name: &str,
    strategy: ResolveStrategy,
) -> Result<Option<RuntimeHandle>> {
    let found = match strategy {
        ResolveStrategy::Inspect => match backend.inspect_container(name).await {
            Ok(summary) => Some(summary),
            Err(EngineError::NotFound(_)) => None,
            Err(e) => return Err(e.during("inspect_container")),
        },
        ResolveStrategy::List => backend
            .list_containers()
            .await
            .map_err(|e| e.during("list_containers"))?
            .into_iter()
            .find(|summary| summary.has_name(name)),
    };

    match &found {
        Some(summary) => tracing::debug!(
            container = name,
            id = %summary.id.short(),
            running = summary.running,
            "existing container found"
        ),
        None => tracing::debug!(container = name, "no existing container"),
    }

    Ok(found.map(|summary| RuntimeHandle {
        container_id: summary.id,
        container_name: name.to_owned(),
    }))
}
