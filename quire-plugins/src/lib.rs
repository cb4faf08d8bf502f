//! Quire source registry
//!
//! This crate handles everything that happens to a content source before it
//! is executed: fetching the catalog manifest, downloading source code,
//! verifying its digests and screening it for structure and forbidden
//! patterns. Code leaves this crate only as [`code::ValidatedCode`].

pub mod code;
pub mod download;
pub mod registry;
pub mod validator;
pub mod verifier;

pub use code::{DownloadedCode, ValidatedCode, VerifiedCode};
pub use registry::{RegistryClient, RegistryClientConfig};
pub use validator::CodeValidator;
