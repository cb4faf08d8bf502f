//! Downloaded plugin code as it moves through the verification pipeline
//!
//! Each stage consumes the previous one, so code can only reach the loader
//! as [`ValidatedCode`], and that type can only be built by
//! [`crate::validator::CodeValidator::validate`] after integrity has been verified.

use sdk::errors::SourceError;

/// Raw bytes straight off the network, plus where they came from
#[derive(Debug, Clone)]
pub struct DownloadedCode {
    bytes: Vec<u8>,
    origin: String,
}

impl DownloadedCode {
    pub fn new(bytes: impl Into<Vec<u8>>, origin: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            origin: origin.into(),
        }
    }

    /// The exact byte sequence that was downloaded
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Decode the bytes once their digest has matched
    ///
    /// A leading UTF-8 byte order mark is not part of the script text.
    pub(crate) fn into_verified(self, sha256: String) -> Result<VerifiedCode, SourceError> {
        let text = String::from_utf8(self.bytes).map_err(|e| {
            SourceError::Structural(format!("{} is not valid UTF-8: {}", self.origin, e))
        })?;
        let source = match text.strip_prefix('\u{feff}') {
            Some(rest) => rest.to_string(),
            None => text,
        };
        Ok(VerifiedCode {
            source,
            origin: self.origin,
            sha256,
        })
    }
}

/// Code whose digest matched the manifest
#[derive(Debug, Clone)]
pub struct VerifiedCode {
    source: String,
    origin: String,
    sha256: String,
}

impl VerifiedCode {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Lowercase hex SHA-256 of the downloaded bytes
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub(crate) fn into_validated(self) -> ValidatedCode {
        ValidatedCode { code: self }
    }
}

/// Code that passed integrity, structural and security checks
#[derive(Debug, Clone)]
pub struct ValidatedCode {
    code: VerifiedCode,
}

impl ValidatedCode {
    pub fn source(&self) -> &str {
        self.code.source()
    }

    pub fn origin(&self) -> &str {
        self.code.origin()
    }

    pub fn sha256(&self) -> &str {
        self.code.sha256()
    }
}
