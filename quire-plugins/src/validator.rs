//! Static screening of plugin source text before any execution
//!
//! Two pattern-based passes run over the verified source:
//!
//! - **Structure**: the code must declare a source derived from the host's
//!   `BaseSource` construct and must carry a default-export marker
//!   (`plugin`), each in any of its accepted surface forms.
//! - **Security**: the code must not reference dynamic-evaluation
//!   primitives, build function pointers from computed strings, or reach for
//!   process, filesystem or socket capabilities.
//!
//! This is defense in depth. It is not a sandbox and makes no semantic
//! guarantees; the sandboxed materialization strategy and the script engine
//! limits are the other layers.

use regex::Regex;
use sdk::errors::SourceError;

use crate::code::{ValidatedCode, VerifiedCode};

/// Accepted ways of declaring a source derived from `BaseSource`
const SUBTYPE_FORMS: &[(&str, &str)] = &[
    // fn create() { let s = BaseSource(...); ... }
    (
        "constructor function",
        r"(?s)\bfn\s+[A-Za-z_]\w*\s*\([^)]*\)\s*\{[^}]*?\bBaseSource\s*\(",
    ),
    // let Source = || { BaseSource(...) };
    (
        "bound closure",
        r"(?s)\b(?:let|const)\s+[A-Za-z_]\w*\s*=\s*\|[^|]*\|[^;]*?\bBaseSource\s*\(",
    ),
    // exports.plugin = || BaseSource(...)  /  #{ plugin: || BaseSource(...) }
    (
        "export object member",
        r"(?s)\bplugin\s*[:=]\s*\|[^|]*\|[^;]*?\bBaseSource\s*\(",
    ),
];

/// Accepted default-export markers
const DEFAULT_EXPORT_FORMS: &[(&str, &str)] = &[
    ("export alias", r"\bexport\s+[A-Za-z_]\w*\s+as\s+plugin\s*;"),
    ("export declaration", r"\bexport\s+(?:const|let)\s+plugin\s*="),
    (
        "exports object",
        r"(?s)\bexports\s*(?:\.\s*plugin\s*=|=\s*#\{[^}]*?\bplugin\s*:)",
    ),
];

/// Denylisted patterns, reported by name
const SECURITY_PATTERNS: &[(&str, &str)] = &[
    ("eval(", r"\beval\s*\("),
    ("Fn(<computed name>)", r#"\bFn\s*\(\s*[^"\s)]"#),
    ("Fn(<concatenated name>)", r#"\bFn\s*\(\s*"[^"]*"\s*\+"#),
    (
        "script compilation",
        r"\b(?:compile|compile_file|compile_scripts_with_scope|eval_file|run_file)\s*\(",
    ),
    (
        "process import",
        r#"\bimport\s+"[^"]*(?:process|spawn|command|shell)[^"]*""#,
    ),
    (
        "filesystem import",
        r#"\bimport\s+"[^"]*(?:\bfs\b|filesystem|file_io|path)[^"]*""#,
    ),
    (
        "network socket import",
        r#"\bimport\s+"[^"]*(?:\bnet\b|socket|tcp|udp)[^"]*""#,
    ),
    ("process spawning", r"\b(?:spawn|exec|system|command)\s*\("),
    (
        "raw filesystem access",
        r"\b(?:open_file|read_file|write_file|remove_file|read_dir|create_dir)\s*\(",
    ),
    (
        "raw socket access",
        r"\b(?:tcp_connect|tcp_listen|udp_bind|socket)\s*\(",
    ),
];

struct NamedPattern {
    name: &'static str,
    regex: Regex,
}

fn compile(table: &[(&'static str, &str)]) -> Result<Vec<NamedPattern>, SourceError> {
    table
        .iter()
        .map(|(name, pattern)| {
            Regex::new(pattern)
                .map(|regex| NamedPattern { name, regex })
                .map_err(|e| SourceError::Config(format!("invalid pattern '{}': {}", name, e)))
        })
        .collect()
}

/// Pattern-based structural and security screening of plugin source text
///
/// # Example
///
/// ```
/// use quire_plugins::validator::CodeValidator;
///
/// let validator = CodeValidator::new().unwrap();
/// let code = r#"
///     fn create() { let s = BaseSource("demo", "Demo", "1.0.0", "https://demo.example"); s }
///     export const plugin = Fn("create");
/// "#;
/// assert!(validator.validate_structure(code).is_ok());
/// assert!(validator.validate_security("eval(\"1 + 1\")").is_err());
/// ```
pub struct CodeValidator {
    subtype_forms: Vec<NamedPattern>,
    default_export_forms: Vec<NamedPattern>,
    security_patterns: Vec<NamedPattern>,
}

impl CodeValidator {
    /// Compile the pattern tables
    pub fn new() -> Result<Self, SourceError> {
        Ok(Self {
            subtype_forms: compile(SUBTYPE_FORMS)?,
            default_export_forms: compile(DEFAULT_EXPORT_FORMS)?,
            security_patterns: compile(SECURITY_PATTERNS)?,
        })
    }

    /// Require a `BaseSource`-derived declaration and a default export
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Structural`] naming what is missing.
    pub fn validate_structure(&self, code: &str) -> Result<(), SourceError> {
        let declaration = self
            .subtype_forms
            .iter()
            .find(|p| p.regex.is_match(code))
            .ok_or_else(|| {
                SourceError::Structural(
                    "no source declaration derived from BaseSource".to_string(),
                )
            })?;

        let export = self
            .default_export_forms
            .iter()
            .find(|p| p.regex.is_match(code))
            .ok_or_else(|| {
                SourceError::Structural("no default export named 'plugin'".to_string())
            })?;

        tracing::debug!(
            declaration = declaration.name,
            export = export.name,
            "Structure accepted"
        );
        Ok(())
    }

    /// Reject code that matches any denylisted pattern
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Security`] naming the first offending pattern.
    pub fn validate_security(&self, code: &str) -> Result<(), SourceError> {
        if let Some(hit) = self.security_patterns.iter().find(|p| p.regex.is_match(code)) {
            tracing::warn!(pattern = hit.name, "Forbidden pattern in source code");
            return Err(SourceError::Security {
                pattern: hit.name.to_string(),
            });
        }
        Ok(())
    }

    /// Run both passes and promote the code to the validated stage
    pub fn validate(&self, code: VerifiedCode) -> Result<ValidatedCode, SourceError> {
        self.validate_structure(code.source())?;
        self.validate_security(code.source())?;
        Ok(code.into_validated())
    }
}
