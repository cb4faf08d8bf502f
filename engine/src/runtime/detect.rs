//! Host runtime class detection
//!
//! The class is probed once per process and decides which materialization
//! strategies are tried, and in which order.

use sdk::errors::StrategyKind;
use std::fmt;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

/// Kind of host the loader is running in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeClass {
    /// Interactive process attached to a terminal
    Client,
    /// Headless process with a writable scratch area
    Server,
    /// Restricted host where nothing can be staged on disk
    Embedded,
}

impl RuntimeClass {
    /// Materialization strategies for this class, in preference order
    pub fn strategy_order(&self) -> &'static [StrategyKind] {
        match self {
            Self::Server => &[
                StrategyKind::SyntheticModule,
                StrategyKind::InlineModule,
                StrategyKind::Sandboxed,
            ],
            Self::Client => &[StrategyKind::InlineModule, StrategyKind::Sandboxed],
            Self::Embedded => &[StrategyKind::Sandboxed],
        }
    }
}

impl fmt::Display for RuntimeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Embedded => "embedded",
        };
        f.write_str(name)
    }
}

static DETECTED: OnceLock<RuntimeClass> = OnceLock::new();

/// Probe the host once and cache the answer for the rest of the process
///
/// `scratch_dir` is where synthetic module files would be staged.
pub fn detect_runtime_class(scratch_dir: &Path) -> RuntimeClass {
    *DETECTED.get_or_init(|| {
        let class = probe(scratch_dir);
        tracing::info!(runtime_class = %class, "Detected runtime class");
        class
    })
}

fn probe(scratch_dir: &Path) -> RuntimeClass {
    if !is_writable(scratch_dir) {
        RuntimeClass::Embedded
    } else if std::io::stdin().is_terminal() {
        RuntimeClass::Client
    } else {
        RuntimeClass::Server
    }
}

fn is_writable(dir: &Path) -> bool {
    std::fs::create_dir_all(dir).is_ok() && tempfile::tempfile_in(dir).is_ok()
}
