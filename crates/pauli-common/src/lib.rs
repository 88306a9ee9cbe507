//! # pauli-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the pauli workspace.
//!
//! This crate is the leaf of the dependency graph. It knows nothing about
//! the container engine and only describes what a build sandbox should look
//! like and how failures are reported.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
