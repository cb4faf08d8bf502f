//! Configuration management
//!
//! This module handles loading, validation, and management of the Quire configuration.
//! Configuration is stored in TOML format at ~/.quire/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **registry**: Manifest URLs, cache window, request timeout
//! - **loader**: Runtime class override, script limits, download timeout
//! - **sources**: Catalog presentation preferences
//!
//! Every field has a default, so a partial file (or an empty one) is valid.
//!
//! # Examples
//!
//! ```no_run
//! use quire_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Manifest: {}", config.registry.manifest_url);
//! println!("Cache window: {:?}", config.registry.cache_ttl());
//! # Ok(())
//! # }
//! ```

use quire_plugins::registry::{RegistryClientConfig, DEFAULT_FALLBACK_URL, DEFAULT_MANIFEST_URL};
use sdk::errors::SourceError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runtime::{RuntimeClass, ScriptLimits};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Manifest retrieval
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Code loading
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Catalog presentation
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    ///
    /// Synthetic module files are staged under `<data_dir>/modules` and
    /// removed as soon as each load attempt finishes.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Manifest retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,

    #[serde(default = "default_fallback_url")]
    pub fallback_url: String,

    /// Seconds a fetched manifest is served from cache
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Seconds before a manifest request is abandoned
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Runtime class selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeClassSetting {
    /// Probe the host once at startup
    #[default]
    Auto,
    Client,
    Server,
    Embedded,
}

impl RuntimeClassSetting {
    /// The forced class, or `None` when detection should run
    pub fn forced(&self) -> Option<RuntimeClass> {
        match self {
            Self::Auto => None,
            Self::Client => Some(RuntimeClass::Client),
            Self::Server => Some(RuntimeClass::Server),
            Self::Embedded => Some(RuntimeClass::Embedded),
        }
    }
}

/// Code loading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default)]
    pub runtime_class: RuntimeClassSetting,

    /// Script operations allowed per load or per call
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    #[serde(default = "default_max_array_size")]
    pub max_array_size: usize,

    #[serde(default = "default_max_map_size")]
    pub max_map_size: usize,

    /// Upper bound for a single `sleep(ms)` from a script
    #[serde(default = "default_sleep_cap_ms")]
    pub sleep_cap_ms: u64,

    /// Seconds before a code download is abandoned
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Seconds a single materialization or member call may run
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

/// Catalog presentation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Show adult sources in catalog listings
    #[serde(default)]
    pub include_nsfw: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.quire/data")
}

fn default_manifest_url() -> String {
    DEFAULT_MANIFEST_URL.to_string()
}

fn default_fallback_url() -> String {
    DEFAULT_FALLBACK_URL.to_string()
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_max_operations() -> u64 {
    5_000_000
}

fn default_max_call_levels() -> usize {
    64
}

fn default_max_string_size() -> usize {
    4 * 1024 * 1024
}

fn default_max_array_size() -> usize {
    100_000
}

fn default_max_map_size() -> usize {
    10_000
}

fn default_sleep_cap_ms() -> u64 {
    5_000
}

fn default_download_timeout_secs() -> u64 {
    30
}

fn default_call_timeout_secs() -> u64 {
    60
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            manifest_url: default_manifest_url(),
            fallback_url: default_fallback_url(),
            cache_ttl_secs: default_cache_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            runtime_class: RuntimeClassSetting::default(),
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_string_size: default_max_string_size(),
            max_array_size: default_max_array_size(),
            max_map_size: default_max_map_size(),
            sleep_cap_ms: default_sleep_cap_ms(),
            download_timeout_secs: default_download_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Settings for [`quire_plugins::registry::RegistryClient`]
    pub fn client_config(&self) -> RegistryClientConfig {
        RegistryClientConfig {
            manifest_url: self.manifest_url.clone(),
            fallback_url: self.fallback_url.clone(),
            cache_duration: self.cache_ttl(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl LoaderConfig {
    pub fn limits(&self) -> ScriptLimits {
        ScriptLimits {
            max_operations: self.max_operations,
            max_call_levels: self.max_call_levels,
            max_string_size: self.max_string_size,
            max_array_size: self.max_array_size,
            max_map_size: self.max_map_size,
            sleep_cap: Duration::from_millis(self.sleep_cap_ms),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

impl Config {
    /// Load configuration from the default location (~/.quire/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, SourceError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Load configuration from `path`, creating a default file there if missing
    pub fn load_or_create_at(path: &Path) -> Result<Self, SourceError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, SourceError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| SourceError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| SourceError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, SourceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SourceError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| SourceError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| SourceError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.quire/config.toml)
    pub fn default_config_path() -> Result<PathBuf, SourceError> {
        let home = dirs::home_dir()
            .ok_or_else(|| SourceError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".quire").join("config.toml"))
    }

    /// Directory where synthetic module files are staged
    pub fn module_dir(&self) -> PathBuf {
        self.core.data_dir.join("modules")
    }

    /// Validate values and expand paths
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The log level is unknown
    /// - A URL is empty or not http(s)
    /// - A timeout or limit is zero
    /// - Path expansion fails
    pub fn validate_and_process(&mut self) -> Result<(), SourceError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(SourceError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        for (name, url) in [
            ("manifest_url", &self.registry.manifest_url),
            ("fallback_url", &self.registry.fallback_url),
        ] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(SourceError::Config(format!(
                    "registry.{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }

        if self.registry.request_timeout_secs == 0 {
            return Err(SourceError::Config(
                "registry.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        let limits = [
            ("max_operations", self.loader.max_operations),
            ("max_call_levels", self.loader.max_call_levels as u64),
            ("max_string_size", self.loader.max_string_size as u64),
            ("max_array_size", self.loader.max_array_size as u64),
            ("max_map_size", self.loader.max_map_size as u64),
            ("download_timeout_secs", self.loader.download_timeout_secs),
            ("call_timeout_secs", self.loader.call_timeout_secs),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, v)| *v == 0) {
            return Err(SourceError::Config(format!(
                "loader.{} must be greater than 0",
                name
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, SourceError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| SourceError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| SourceError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| SourceError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
