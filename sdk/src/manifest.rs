//! Manifest types for the content-source catalog
//!
//! Field names follow the published catalog format verbatim (camelCase on the
//! wire). The manifest is always fetched and replaced as a whole.

use crate::errors::SourceError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The full catalog document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub metadata: ManifestMetadata,
    pub sources: Vec<ManifestEntry>,
    /// Tag → source ids
    #[serde(default)]
    pub categories: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub featured: Vec<String>,
    #[serde(default)]
    pub deprecated: Vec<String>,
    #[serde(default)]
    pub notices: Vec<serde_json::Value>,
}

impl Manifest {
    /// Parse a manifest payload, checking the top-level shape first
    ///
    /// `sources` must be an array and `version` and `metadata` must be present.
    /// Any violation is reported as [`SourceError::Format`].
    pub fn from_json(json: &str) -> Result<Self, SourceError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| SourceError::Format(format!("manifest is not valid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Structurally validate and convert an already-parsed payload
    pub fn from_value(value: serde_json::Value) -> Result<Self, SourceError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SourceError::Format("manifest must be a JSON object".to_string()))?;

        if !obj.get("sources").is_some_and(|s| s.is_array()) {
            return Err(SourceError::Format(
                "manifest field 'sources' must be an array".to_string(),
            ));
        }
        for field in ["version", "metadata"] {
            if obj.get(field).map_or(true, |v| v.is_null()) {
                return Err(SourceError::Format(format!(
                    "manifest field '{}' is missing",
                    field
                )));
            }
        }

        serde_json::from_value(value)
            .map_err(|e| SourceError::Format(format!("manifest schema mismatch: {}", e)))
    }

    /// Serialize manifest to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Find a source entry by id
    pub fn find_source(&self, id: &str) -> Option<&ManifestEntry> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Whether the catalog marks this id as deprecated
    pub fn is_deprecated(&self, id: &str) -> bool {
        self.deprecated.iter().any(|d| d == id)
    }

    /// Entries listed under a category tag, in category order
    pub fn sources_in_category(&self, tag: &str) -> Vec<&ManifestEntry> {
        self.categories
            .get(tag)
            .map(|ids| ids.iter().filter_map(|id| self.find_source(id)).collect())
            .unwrap_or_default()
    }

    /// Featured entries, in featured order
    pub fn featured_sources(&self) -> Vec<&ManifestEntry> {
        self.featured
            .iter()
            .filter_map(|id| self.find_source(id))
            .collect()
    }

    /// Entries shown to the user, hiding adult sources unless requested
    pub fn visible_sources(&self, include_nsfw: bool) -> Vec<&ManifestEntry> {
        self.sources
            .iter()
            .filter(|s| include_nsfw || !s.metadata.nsfw)
            .collect()
    }

    /// Case-insensitive search over id, name, description and tags
    pub fn search(&self, query: &str) -> Vec<&ManifestEntry> {
        let needle = query.to_lowercase();
        self.sources
            .iter()
            .filter(|s| {
                s.id.to_lowercase().contains(&needle)
                    || s.name.to_lowercase().contains(&needle)
                    || s.description.to_lowercase().contains(&needle)
                    || s.metadata
                        .tags
                        .iter()
                        .any(|t| t.to_lowercase().contains(&needle))
            })
            .collect()
    }
}

/// Catalog-level metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestMetadata {
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub total_sources: u64,
    #[serde(default)]
    pub maintainer: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub license: String,
}

/// A single installable source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: String,
    pub name: String,
    pub version: String,
    pub base_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub repository: String,
    pub downloads: Downloads,
    pub integrity: Integrity,
    #[serde(default)]
    pub metadata: EntryMetadata,
    #[serde(default)]
    pub legal: Legal,
    #[serde(default)]
    pub changelog: Vec<ChangelogEntry>,
    #[serde(default)]
    pub statistics: Statistics,
    /// `supportsSearch` and friends, as declared by the publisher
    #[serde(default)]
    pub capabilities: BTreeMap<String, bool>,
}

impl ManifestEntry {
    /// Check the entry-level invariants before anything is downloaded
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Format`] when `integrity.sha256` is not a
    /// 64-character hex string or `version` is not semver.
    pub fn validate(&self) -> Result<(), SourceError> {
        if !is_sha256_hex(&self.integrity.sha256) {
            return Err(SourceError::Format(format!(
                "source '{}' declares a malformed sha256 digest",
                self.id
            )));
        }
        self.semver()?;
        Ok(())
    }

    /// The entry version parsed as semver
    pub fn semver(&self) -> Result<semver::Version, SourceError> {
        semver::Version::parse(&self.version).map_err(|e| {
            SourceError::Format(format!(
                "source '{}' has invalid version '{}': {}",
                self.id, self.version, e
            ))
        })
    }

    /// Whether a host running `core` may load this entry
    ///
    /// Unparseable bounds are treated as unsatisfied.
    pub fn supports_core(&self, core: &semver::Version) -> bool {
        let min_ok = self.metadata.min_core_version.is_empty()
            || semver::Version::parse(&self.metadata.min_core_version)
                .is_ok_and(|min| *core >= min);
        let max_ok = match self.metadata.max_core_version.as_deref() {
            None | Some("") => true,
            Some(max) => semver::Version::parse(max).is_ok_and(|max| *core <= max),
        };
        min_ok && max_ok
    }

    /// Whether any changelog entry newer than `installed` is breaking
    pub fn has_breaking_change_since(&self, installed: &semver::Version) -> bool {
        self.changelog.iter().any(|c| {
            c.breaking && semver::Version::parse(&c.version).is_ok_and(|v| v > *installed)
        })
    }
}

/// Whether `digest` is a 64-character hex string
pub fn is_sha256_hex(digest: &str) -> bool {
    digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
}

/// Download locations for a source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Downloads {
    pub stable: String,
    #[serde(default)]
    pub latest: String,
    /// version → url
    #[serde(default)]
    pub versions: BTreeMap<String, String>,
}

/// Declared digests of the stable artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Integrity {
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub official: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub min_core_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_core_version: Option<String>,
    #[serde(default)]
    pub website_url: String,
    #[serde(default)]
    pub support_url: String,
}

/// How a source obtains its content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Api,
    #[default]
    Scraper,
    Hybrid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Legal {
    #[serde(default)]
    pub disclaimer: String,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub version: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub changes: Vec<String>,
    #[serde(default)]
    pub breaking: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub stars: u64,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub active_users: u64,
}
