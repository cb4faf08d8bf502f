//! Quire SDK
//!
//! Shared library providing the manifest format, the content-source trait and
//! the error types used by the loader and by host applications.

/// Content source trait
pub mod source;

/// Error types and handling
pub mod errors;

/// Content and capability types
pub mod types;

/// Manifest types
pub mod manifest;

// Re-export commonly used types
pub use errors::{SourceError, SourceErrorExt, SourceResult, StrategyFailure, StrategyKind};
pub use manifest::{Manifest, ManifestEntry};
pub use source::ContentSource;
pub use types::{Capability, Content, Item, SubItem};
