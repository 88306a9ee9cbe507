//! Build container lifecycle for pauli.
//!
//! The [`orchestrator::Orchestrator`] turns an assembled
//! [`assemble::ContainerConfig`] into a running container, reusing an
//! existing one when it can, runs exec sessions inside it and tears it down.
//! Everything engine-specific sits behind [`backend::ContainerBackend`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod assemble;
pub mod backend;
pub mod exec;
pub mod lease;
pub mod mount;
pub mod orchestrator;
pub mod relay;
pub mod resolver;
pub mod shell;
pub mod watcher;
