//! Install, update and uninstall workflows
//!
//! The orchestrator composes the registry client, downloader, verifier,
//! validator, runtime loader and plugin registry:
//!
//! ```text
//! resolve entry -> download -> verify integrity -> validate -> materialize
//!   -> instantiate -> shape check -> register
//! ```
//!
//! Verification and validation always finish before any plugin code runs.
//! Progress is reported synchronously at 0, 20, 50, 70, 80, 90 and 100.

use quire_plugins::download::download_code;
use quire_plugins::registry::{build_http_client, RegistryClient};
use quire_plugins::validator::CodeValidator;
use quire_plugins::verifier::verify_code;
use sdk::errors::{SourceError, StrategyKind};
use sdk::manifest::{Manifest, ManifestEntry};
use sdk::source::ContentSource;
use semver::Version;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::Config;
use crate::registry::PluginRegistry;
use crate::runtime::{detect_runtime_class, HostEnv, LoadState, LoadTracker, RuntimeLoader};

/// What the orchestrator remembers about an installed source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledSource {
    pub id: String,
    pub version: String,
    pub sha256: String,
    pub origin: String,
    #[serde(serialize_with = "serialize_strategy")]
    pub strategy: StrategyKind,
}

fn serialize_strategy<S: serde::Serializer>(kind: &StrategyKind, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(kind)
}

/// A newer catalog version of an installed source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateAvailable {
    pub id: String,
    pub installed: String,
    pub available: String,
    /// A changelog entry newer than the installed version is marked breaking
    pub breaking: bool,
}

/// Version of the running core, checked against entry compatibility bounds
pub fn core_version() -> Version {
    Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| Version::new(0, 0, 0))
}

/// Composes discovery, verification, loading and registration
pub struct Orchestrator {
    client: RegistryClient,
    http: reqwest::Client,
    validator: CodeValidator,
    loader: Arc<RuntimeLoader>,
    registry: Arc<PluginRegistry>,
    installed: Mutex<HashMap<String, InstalledSource>>,
    states: Mutex<HashMap<String, LoadState>>,
    download_timeout: Duration,
    core_version: Version,
}

impl Orchestrator {
    /// Assemble an orchestrator from its parts
    pub fn new(
        client: RegistryClient,
        http: reqwest::Client,
        loader: RuntimeLoader,
        registry: Arc<PluginRegistry>,
        download_timeout: Duration,
    ) -> Result<Self, SourceError> {
        Ok(Self {
            client,
            http,
            validator: CodeValidator::new()?,
            loader: Arc::new(loader),
            registry,
            installed: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            download_timeout,
            core_version: core_version(),
        })
    }

    /// Build everything from configuration
    ///
    /// The runtime class comes from `loader.runtime_class`, or from a
    /// one-time probe when that is `auto`.
    pub fn from_config(config: &Config, registry: Arc<PluginRegistry>) -> Result<Self, SourceError> {
        let http = build_http_client()?;
        let client = RegistryClient::with_http(http.clone(), config.registry.client_config());

        let scratch = config.module_dir();
        let class = config
            .loader
            .runtime_class
            .forced()
            .unwrap_or_else(|| detect_runtime_class(&scratch));
        let loader = RuntimeLoader::new(
            class,
            HostEnv::new(config.loader.limits(), http.clone()),
            scratch,
        );

        Self::new(client, http, loader, registry, config.loader.download_timeout())
    }

    /// Override the core version used for compatibility checks
    pub fn with_core_version(mut self, version: Version) -> Self {
        self.core_version = version;
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn registry_client(&self) -> &RegistryClient {
        &self.client
    }

    pub fn loader(&self) -> &RuntimeLoader {
        &self.loader
    }

    /// Last known load state of `id`
    pub fn load_state(&self, id: &str) -> Option<LoadState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }

    /// Install records, ordered by id
    pub fn installed(&self) -> Vec<InstalledSource> {
        let installed = self.installed.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = installed.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Resolve the catalog entry for `id`
    pub async fn resolve(&self, id: &str) -> Result<ManifestEntry, SourceError> {
        let manifest = self.client.fetch_manifest().await?;
        manifest
            .find_source(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    /// Download, verify, validate, load and register source `id`
    ///
    /// `on_progress(percent, status)` is called at each milestone.
    ///
    /// # Errors
    ///
    /// Any failure leaves the registry without an entry for `id` unless one
    /// was registered before this call. Integrity, structural and security
    /// failures happen before any of the downloaded code runs.
    pub async fn install<F>(&self, id: &str, on_progress: F) -> Result<Arc<dyn ContentSource>, SourceError>
    where
        F: Fn(u8, &str) + Send + Sync,
    {
        let mut tracker = LoadTracker::new(id);
        let result = self.run_install(id, &on_progress, &mut tracker).await;
        let result = result.map_err(|e| tracker.fail(e));
        self.set_state(id, tracker.state());
        result
    }

    async fn run_install<F>(
        &self,
        id: &str,
        on_progress: &F,
        tracker: &mut LoadTracker,
    ) -> Result<Arc<dyn ContentSource>, SourceError>
    where
        F: Fn(u8, &str) + Send + Sync,
    {
        on_progress(0, "Resolving source");
        let manifest = self.client.fetch_manifest().await?;
        let entry = manifest
            .find_source(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))?;
        self.check_entry(&manifest, &entry)?;

        on_progress(20, "Downloading");
        let downloaded = download_code(&self.http, &entry.downloads.stable, self.download_timeout).await?;
        tracker.advance(LoadState::Downloaded)?;

        let verified = verify_code(id, downloaded, &entry.integrity)?;
        tracker.advance(LoadState::Verified)?;
        on_progress(50, "Integrity verified");

        let validated = self.validator.validate(verified)?;
        tracker.advance(LoadState::Validated)?;
        on_progress(70, "Code validated");

        tracker.advance(LoadState::Materializing)?;
        on_progress(80, "Instantiating");
        let loader = Arc::clone(&self.loader);
        let code = validated.clone();
        let source = tokio::task::spawn_blocking(move || loader.load(&code))
            .await
            .map_err(|e| SourceError::Plugin(format!("loader task failed: {}", e)))??;
        tracker.advance(LoadState::Instantiated)?;

        if source.id() != entry.id {
            tracing::error!(
                source_id = %entry.id,
                instance_id = %source.id(),
                "Instance id does not match catalog entry"
            );
            return Err(SourceError::InstanceShape {
                member: "id".to_string(),
            });
        }

        on_progress(90, "Registering");
        let record = InstalledSource {
            id: entry.id.clone(),
            version: entry.version.clone(),
            sha256: validated.sha256().to_string(),
            origin: validated.origin().to_string(),
            strategy: source.strategy(),
        };
        let source: Arc<dyn ContentSource> = Arc::new(source);
        self.registry.register(Arc::clone(&source));
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.id.clone(), record);
        tracker.advance(LoadState::Registered)?;

        tracing::info!(source_id = %id, version = %entry.version, "Installed source");
        on_progress(100, "Installed");
        Ok(source)
    }

    /// Entry-level checks that run before anything is downloaded
    fn check_entry(&self, manifest: &Manifest, entry: &ManifestEntry) -> Result<(), SourceError> {
        entry.validate()?;

        if entry.downloads.stable.trim().is_empty() {
            return Err(SourceError::Format(format!(
                "source '{}' has no stable download",
                entry.id
            )));
        }

        if !entry.supports_core(&self.core_version) {
            let meta = &entry.metadata;
            let mut bounds = Vec::new();
            if !meta.min_core_version.is_empty() {
                bounds.push(format!(">={}", meta.min_core_version));
            }
            if let Some(max) = meta.max_core_version.as_deref().filter(|m| !m.is_empty()) {
                bounds.push(format!("<={}", max));
            }
            return Err(SourceError::Incompatible {
                id: entry.id.clone(),
                requirement: bounds.join(", "),
                core: self.core_version.to_string(),
            });
        }

        if manifest.is_deprecated(&entry.id) {
            tracing::warn!(source_id = %entry.id, "Installing a deprecated source");
        }

        Ok(())
    }

    /// Remove `id` from the registry and forget its install record
    ///
    /// Returns whether anything was removed.
    pub fn uninstall(&self, id: &str) -> bool {
        let unregistered = self.registry.unregister(id);
        let forgotten = self
            .installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        if unregistered || forgotten {
            tracing::info!(source_id = %id, "Uninstalled source");
        }
        unregistered || forgotten
    }

    /// Uninstall `id`, then install it fresh
    pub async fn update<F>(&self, id: &str, on_progress: F) -> Result<Arc<dyn ContentSource>, SourceError>
    where
        F: Fn(u8, &str) + Send + Sync,
    {
        self.uninstall(id);
        self.install(id, on_progress).await
    }

    /// Installed sources whose catalog version is newer
    pub async fn check_updates(&self) -> Result<Vec<UpdateAvailable>, SourceError> {
        let manifest = self.client.fetch_manifest().await?;
        let mut updates = Vec::new();

        for record in self.installed() {
            let Some(entry) = manifest.find_source(&record.id) else {
                continue;
            };
            let (Ok(installed), Ok(available)) = (Version::parse(&record.version), entry.semver())
            else {
                tracing::debug!(source_id = %record.id, "Skipping update check for unparseable version");
                continue;
            };

            if available > installed {
                updates.push(UpdateAvailable {
                    id: record.id.clone(),
                    installed: record.version.clone(),
                    available: entry.version.clone(),
                    breaking: entry.has_breaking_change_since(&installed),
                });
            }
        }

        Ok(updates)
    }

    /// Drop every loaded source and install record
    pub fn shutdown(&self) {
        self.registry.clear();
        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::info!("Orchestrator shut down");
    }

    fn set_state(&self, id: &str, state: LoadState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), state);
    }
}
