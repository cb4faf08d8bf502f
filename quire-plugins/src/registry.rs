//! Source registry client. Fetches the catalog manifest from the primary
//! URL with a single fallback hop, and caches it for a fixed window

use reqwest::Url;
use sdk::errors::SourceError;
use sdk::manifest::Manifest;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Default primary catalog location
pub const DEFAULT_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/quire-sources/registry/main/manifest.json";

/// Default fallback catalog location
pub const DEFAULT_FALLBACK_URL: &str =
    "https://cdn.jsdelivr.net/gh/quire-sources/registry@main/manifest.json";

/// Query parameter appended to every request to defeat intermediary caches
pub const CACHE_BUST_PARAM: &str = "_ts";

/// Where and how to fetch the catalog
#[derive(Debug, Clone)]
pub struct RegistryClientConfig {
    pub manifest_url: String,
    pub fallback_url: String,
    /// How long a fetched manifest is served without touching the network
    pub cache_duration: Duration,
    /// Upper bound for each individual retrieval
    pub request_timeout: Duration,
}

impl Default for RegistryClientConfig {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            cache_duration: Duration::from_secs(24 * 60 * 60),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// A manifest plus the window in which it may be served verbatim
#[derive(Debug, Clone)]
pub struct CachedManifest {
    pub manifest: Manifest,
    pub fetched_at: Instant,
    pub expires_at: Instant,
}

impl CachedManifest {
    fn new(manifest: Manifest, ttl: Duration) -> Self {
        let fetched_at = Instant::now();
        Self {
            manifest,
            fetched_at,
            expires_at: fetched_at + ttl,
        }
    }

    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Fetches and caches the catalog manifest
///
/// Retrieval order is primary URL, then the fallback URL once. There is no
/// further retry or backoff here; callers decide whether to try again.
pub struct RegistryClient {
    http: reqwest::Client,
    config: RegistryClientConfig,
    cache: Mutex<Option<CachedManifest>>,
    network_fetches: AtomicU64,
}

impl RegistryClient {
    /// Create a client with its own HTTP connection pool
    pub fn new(config: RegistryClientConfig) -> Result<Self, SourceError> {
        Ok(Self::with_http(build_http_client()?, config))
    }

    /// Create a client sharing an existing HTTP connection pool
    pub fn with_http(http: reqwest::Client, config: RegistryClientConfig) -> Self {
        Self {
            http,
            config,
            cache: Mutex::new(None),
            network_fetches: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RegistryClientConfig {
        &self.config
    }

    /// Number of manifest retrieval rounds that went to the network
    pub fn network_fetches(&self) -> u64 {
        self.network_fetches.load(Ordering::Relaxed)
    }

    /// Return the catalog, from cache while it is fresh
    ///
    /// # Errors
    ///
    /// - [`SourceError::Network`] when both primary and fallback fail; the
    ///   message carries both reasons.
    /// - [`SourceError::Format`] when the payload fails the shape check.
    ///   Malformed payloads are never cached.
    pub async fn fetch_manifest(&self) -> Result<Manifest, SourceError> {
        // Held across the fetch so concurrent callers share one network round
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh()) {
            tracing::debug!(
                age_ms = cached.fetched_at.elapsed().as_millis() as u64,
                "Serving cached manifest"
            );
            return Ok(cached.manifest.clone());
        }

        let manifest = self.fetch_remote().await?;
        *cache = Some(CachedManifest::new(
            manifest.clone(),
            self.config.cache_duration,
        ));
        Ok(manifest)
    }

    /// Drop the cached manifest and fetch a fresh one
    pub async fn refresh(&self) -> Result<Manifest, SourceError> {
        self.clear_cache().await;
        self.fetch_manifest().await
    }

    pub async fn clear_cache(&self) {
        *self.cache.lock().await = None;
    }

    /// The cached manifest, fresh or not, without touching the network
    pub async fn cached(&self) -> Option<CachedManifest> {
        self.cache.lock().await.clone()
    }

    async fn fetch_remote(&self) -> Result<Manifest, SourceError> {
        self.network_fetches.fetch_add(1, Ordering::Relaxed);

        let body = match self.fetch_text(&self.config.manifest_url).await {
            Ok(body) => body,
            Err(primary) => {
                tracing::warn!(
                    url = %self.config.manifest_url,
                    error = %primary,
                    "Primary manifest fetch failed, trying fallback"
                );
                self.fetch_text(&self.config.fallback_url)
                    .await
                    .map_err(|fallback| {
                        tracing::error!(error = %fallback, "Fallback manifest fetch failed");
                        SourceError::Network(format!(
                            "primary: {}; fallback: {}",
                            primary, fallback
                        ))
                    })?
            }
        };

        let manifest = Manifest::from_json(&body)?;
        tracing::info!(
            version = %manifest.version,
            sources = manifest.sources.len(),
            "Fetched source manifest"
        );
        Ok(manifest)
    }

    async fn fetch_text(&self, url: &str) -> Result<String, String> {
        let url = with_cache_bust(url).map_err(|e| e.to_string())?;
        fetch_text_with_timeout(&self.http, url, self.config.request_timeout).await
    }
}

/// Build the HTTP client shared by the registry client and downloader
pub fn build_http_client() -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(concat!("quire/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SourceError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Append the cache-defeating query parameter to `url`
pub fn with_cache_bust(url: &str) -> Result<Url, SourceError> {
    let mut parsed = Url::parse(url)
        .map_err(|e| SourceError::Network(format!("invalid URL '{}': {}", url, e)))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    parsed
        .query_pairs_mut()
        .append_pair(CACHE_BUST_PARAM, &stamp.to_string());
    Ok(parsed)
}

/// GET `url` as raw bytes, abandoning the request once `timeout` elapses
///
/// Non-2xx statuses are failures. On timeout nothing partial is returned.
pub(crate) async fn fetch_bytes_with_timeout(
    http: &reqwest::Client,
    url: Url,
    timeout: Duration,
) -> Result<Vec<u8>, String> {
    let request = async {
        let response = http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?
            .error_for_status()
            .map_err(|e| format!("bad status: {}", e))?;
        response
            .bytes()
            .await
            .map(|body| body.to_vec())
            .map_err(|e| format!("failed to read body: {}", e))
    };

    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
    }
}

/// GET `url` as UTF-8 text, with the same bounds as [`fetch_bytes_with_timeout`]
pub(crate) async fn fetch_text_with_timeout(
    http: &reqwest::Client,
    url: Url,
    timeout: Duration,
) -> Result<String, String> {
    let body = fetch_bytes_with_timeout(http, url, timeout).await?;
    String::from_utf8(body).map_err(|e| format!("body is not UTF-8: {}", e))
}
