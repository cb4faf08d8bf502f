//! In-memory registry of live content sources
//!
//! Maps source id to instance. The registry is an explicit object owned by
//! whoever composes the loader (usually the [`crate::orchestrator::Orchestrator`]);
//! there is no global instance and nothing is persisted.
//!
//! Every write is a single map operation under the lock, so concurrent
//! installs never observe a half-registered instance.

use sdk::source::ContentSource;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Process-wide mapping from source id to live instance
#[derive(Default)]
pub struct PluginRegistry {
    sources: RwLock<HashMap<String, Arc<dyn ContentSource>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under its id, replacing any previous instance
    ///
    /// Returns the replaced instance, if there was one.
    pub fn register(&self, source: Arc<dyn ContentSource>) -> Option<Arc<dyn ContentSource>> {
        let id = source.id().to_string();
        let version = source.version().to_string();

        let previous = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), source);

        match &previous {
            Some(old) => tracing::info!(
                source_id = %id,
                old_version = %old.version(),
                new_version = %version,
                "Replaced registered source"
            ),
            None => tracing::info!(source_id = %id, version = %version, "Registered source"),
        }
        previous
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ContentSource>> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// All registered instances, ordered by id
    pub fn list(&self) -> Vec<Arc<dyn ContentSource>> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = sources.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    pub fn has(&self, id: &str) -> bool {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Remove `id`; returns whether it was registered
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        if removed {
            tracing::info!(source_id = %id, "Unregistered source");
        }
        removed
    }

    pub fn clear(&self) {
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        let count = sources.len();
        sources.clear();
        tracing::info!(count, "Cleared source registry");
    }

    pub fn len(&self) -> usize {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Instances whose member `name` is currently callable, ordered by id
    ///
    /// Capability aliases (`trending`, `byPage`, ...) are resolved to member
    /// names first.
    pub fn by_capability(&self, name: &str) -> Vec<Arc<dyn ContentSource>> {
        let member = name
            .parse::<sdk::types::Capability>()
            .map(|cap| cap.member_name().to_string())
            .unwrap_or_else(|_| name.to_string());

        self.list()
            .into_iter()
            .filter(|source| source.is_callable(&member))
            .collect()
    }
}
