//! Error types and handling
//!
//! This module provides the error types used throughout Quire.
//! All errors implement the `SourceErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Fail-closed kinds
//!
//! `Integrity`, `Structural` and `Security` are raised strictly before any
//! plugin code runs. None of them is recoverable and none of them may be
//! downgraded to a warning by callers.

use std::fmt;
use thiserror::Error;

/// Trait for Quire error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information.
pub trait SourceErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and never echoes plugin code,
    /// URLs or hashes.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried (typically network failures).
    fn is_recoverable(&self) -> bool;
}

/// Name of a materialization strategy, used in aggregated load failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Code written to a throwaway module file and imported from there
    SyntheticModule,
    /// Code encoded into an inline module specifier
    InlineModule,
    /// Code rewritten and evaluated in an isolated engine
    Sandboxed,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SyntheticModule => "synthetic-module",
            Self::InlineModule => "inline-module",
            Self::Sandboxed => "sandboxed",
        };
        f.write_str(name)
    }
}

/// One strategy's reason for failing to materialize a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: StrategyKind,
    pub reason: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

fn join_failures(failures: &[StrategyFailure]) -> String {
    if failures.is_empty() {
        return "no materialization strategy available".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Main error type for source discovery, verification and loading
///
/// # Examples
///
/// ```
/// use sdk::errors::{SourceError, SourceErrorExt};
///
/// let error = SourceError::Network("primary: timed out; fallback: 503".to_string());
/// assert!(error.is_recoverable());
///
/// let fatal = SourceError::Security {
///     pattern: "eval(".to_string(),
/// };
/// assert!(!fatal.is_recoverable());
/// println!("Hint: {}", fatal.user_hint());
/// ```
#[derive(Debug, Error)]
pub enum SourceError {
    // Retrieval errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Manifest format error: {0}")]
    Format(String),

    #[error("Source not found: {0}")]
    NotFound(String),

    // Verification errors
    #[error("Integrity check failed for '{id}': expected {expected}, got {actual}")]
    Integrity {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("Structural validation failed: {0}")]
    Structural(String),

    #[error("Security validation failed: forbidden pattern '{pattern}'")]
    Security { pattern: String },

    // Loading errors
    #[error("Load failed: {}", join_failures(.0))]
    Load(Vec<StrategyFailure>),

    #[error("Instance shape invalid: missing or invalid member '{member}'")]
    InstanceShape { member: String },

    #[error("Source '{id}' requires core {requirement}, running {core}")]
    Incompatible {
        id: String,
        requirement: String,
        core: String,
    },

    // Runtime errors
    #[error("Capability not supported: {0}")]
    Unsupported(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceErrorExt for SourceError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Network(_) => "Source registry unreachable. Check your connection",
            Self::Format(_) => "The source registry returned malformed data",
            Self::NotFound(_) => "No source with that id exists in the registry",

            Self::Integrity { .. } => "Security verification failed. Download may be tampered",
            Self::Structural(_) => "The downloaded source is not a valid plugin",
            Self::Security { .. } => "The downloaded source was rejected for security reasons",

            Self::Load(_) => "The source could not be loaded on this host",
            Self::InstanceShape { .. } => "The source is missing required features",
            Self::Incompatible { .. } => "The source needs a different Quire version",

            Self::Unsupported(_) => "This source does not support that operation",
            Self::Plugin(_) => "The source reported an error",

            Self::Config(_) => "Check your config.toml file for errors",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Format(_)
            | Self::NotFound(_)
            | Self::Integrity { .. }
            | Self::Structural(_)
            | Self::Security { .. }
            | Self::Load(_)
            | Self::InstanceShape { .. }
            | Self::Incompatible { .. } => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}

/// Convenience alias used across the workspace
pub type SourceResult<T> = Result<T, SourceError>;
