//! Quire Engine Library
//!
//! Loads content sources from the published catalog: integrity
//! verification, code validation, materialization, instantiation and the
//! in-memory registry. Used by the `quire` binary and integration tests.

/// Configuration management module
pub mod config;

/// Runtime module for materializing and instantiating sources
pub mod runtime;

/// In-memory source registry
pub mod registry;

/// Install, update and uninstall workflows
pub mod orchestrator;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
