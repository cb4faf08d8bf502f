//! Load lifecycle of a single source

use sdk::errors::SourceError;
use std::fmt;

/// Where a source is in its load lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    Unloaded,
    Downloaded,
    Verified,
    Validated,
    Materializing,
    Instantiated,
    Registered,
    Failed,
}

impl LoadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Registered | Self::Failed)
    }

    /// The single forward successor, if any
    fn next(&self) -> Option<LoadState> {
        match self {
            Self::Unloaded => Some(Self::Downloaded),
            Self::Downloaded => Some(Self::Verified),
            Self::Verified => Some(Self::Validated),
            Self::Validated => Some(Self::Materializing),
            Self::Materializing => Some(Self::Instantiated),
            Self::Instantiated => Some(Self::Registered),
            Self::Registered | Self::Failed => None,
        }
    }

    /// Whether `self -> to` is a legal transition
    ///
    /// The chain is strictly linear; `Failed` is reachable from every
    /// non-terminal state.
    pub fn can_transition_to(&self, to: LoadState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unloaded => "unloaded",
            Self::Downloaded => "downloaded",
            Self::Verified => "verified",
            Self::Validated => "validated",
            Self::Materializing => "materializing",
            Self::Instantiated => "instantiated",
            Self::Registered => "registered",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks and logs the lifecycle of one load attempt
#[derive(Debug)]
pub struct LoadTracker {
    id: String,
    state: LoadState,
}

impl LoadTracker {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: LoadState::Unloaded,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Move to `to`, rejecting anything but the next step or `Failed`
    pub fn advance(&mut self, to: LoadState) -> Result<(), SourceError> {
        if !self.state.can_transition_to(to) {
            return Err(SourceError::Plugin(format!(
                "illegal load transition for '{}': {} -> {}",
                self.id, self.state, to
            )));
        }
        tracing::debug!(source_id = %self.id, from = %self.state, to = %to, "Load state");
        self.state = to;
        Ok(())
    }

    /// Record a failure and hand the error back
    pub fn fail(&mut self, error: SourceError) -> SourceError {
        if !self.state.is_terminal() {
            tracing::warn!(
                source_id = %self.id,
                from = %self.state,
                error = %error,
                "Load failed"
            );
            self.state = LoadState::Failed;
        }
        error
    }
}
