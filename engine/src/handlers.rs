//! Command handlers for CLI operations
//!
//! Each handler drives the [`Orchestrator`] and prints either human-readable
//! text or JSON. Errors surface as `anyhow` at this boundary.

use anyhow::{Context, Result};
use sdk::manifest::{Manifest, ManifestEntry};
use sdk::source::ContentSource;
use sdk::types::{Capability, Item};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::orchestrator::Orchestrator;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Catalog listing filters
#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub refresh: bool,
    pub tag: Option<String>,
    pub search: Option<String>,
    pub featured: bool,
    pub include_nsfw: bool,
}

impl CatalogFilter {
    /// Entries of `manifest` that pass every filter, in catalog order
    ///
    /// A tag matches either an entry's own tags (case-insensitive) or the
    /// manifest's category listing for that tag.
    pub fn apply<'a>(&self, manifest: &'a Manifest) -> Vec<&'a ManifestEntry> {
        let mut entries = manifest.visible_sources(self.include_nsfw);

        if let Some(query) = &self.search {
            let hits = manifest.search(query);
            entries.retain(|e| hits.iter().any(|h| h.id == e.id));
        }

        if self.featured {
            let featured = manifest.featured_sources();
            entries.retain(|e| featured.iter().any(|f| f.id == e.id));
        }

        if let Some(tag) = &self.tag {
            let listed = manifest.sources_in_category(tag);
            entries.retain(|e| {
                e.metadata.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
                    || listed.iter().any(|l| l.id == e.id)
            });
        }

        entries
    }
}

/// List catalog entries
pub async fn handle_catalog(
    orchestrator: &Orchestrator,
    filter: &CatalogFilter,
    format: OutputFormat,
) -> Result<()> {
    let client = orchestrator.registry_client();
    let manifest = if filter.refresh {
        client.refresh().await
    } else {
        client.fetch_manifest().await
    }
    .context("Failed to fetch source catalog")?;

    let entries = filter.apply(&manifest);

    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No sources match");
                return Ok(());
            }
            println!("Sources ({} of {}):", entries.len(), manifest.sources.len());
            println!();
            for entry in entries {
                let marker = if manifest.is_deprecated(&entry.id) {
                    " (deprecated)"
                } else {
                    ""
                };
                println!("  {:<20} {:<10} {}{}", entry.id, entry.version, entry.name, marker);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "version": manifest.version,
                "count": entries.len(),
                "sources": entries,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Show one catalog entry
pub async fn handle_info(orchestrator: &Orchestrator, id: &str, format: OutputFormat) -> Result<()> {
    let entry = orchestrator.resolve(id).await?;

    match format {
        OutputFormat::Text => {
            println!("{} ({})", entry.name, entry.id);
            println!("  Version:  {}", entry.version);
            println!("  Base URL: {}", entry.base_url);
            if !entry.author.is_empty() {
                println!("  Author:   {}", entry.author);
            }
            if !entry.metadata.tags.is_empty() {
                println!("  Tags:     {}", entry.metadata.tags.join(", "));
            }
            if !entry.metadata.min_core_version.is_empty() {
                println!("  Requires: core >= {}", entry.metadata.min_core_version);
            }
            println!("  SHA-256:  {}", entry.integrity.sha256);
            if !entry.description.is_empty() {
                println!();
                println!("{}", entry.description);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
    }
    Ok(())
}

/// Install a source and report how it was loaded
pub async fn handle_install(orchestrator: &Orchestrator, id: &str, format: OutputFormat) -> Result<()> {
    let show_progress = matches!(format, OutputFormat::Text);
    orchestrator
        .install(id, |percent, status| {
            if show_progress {
                println!("[{:>3}%] {}", percent, status);
            } else {
                tracing::debug!(percent, status, "Install progress");
            }
        })
        .await
        .with_context(|| format!("Failed to install '{}'", id))?;

    let record = orchestrator
        .installed()
        .into_iter()
        .find(|r| r.id == id)
        .context("Install record missing after install")?;
    let optional = optional_capabilities(orchestrator, id);

    match format {
        OutputFormat::Text => {
            println!();
            println!("✓ Installed {} {}", record.id, record.version);
            println!("  Strategy: {}", record.strategy);
            println!("  SHA-256:  {}", record.sha256);
            if !optional.is_empty() {
                println!("  Optional: {}", optional.join(", "));
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "installed": record,
                "optional_capabilities": optional,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Fetch details of one item
pub async fn handle_details(
    orchestrator: &Orchestrator,
    id: &str,
    item_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let source = ensure_installed(orchestrator, id).await?;
    let item = source.fetch_item_details(item_id).await?;

    match format {
        OutputFormat::Text => print_item(&item, true),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&item)?),
    }
    Ok(())
}

/// List the sub-items of an item
pub async fn handle_sub_items(
    orchestrator: &Orchestrator,
    id: &str,
    item_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let source = ensure_installed(orchestrator, id).await?;
    let sub_items = source.list_sub_items(item_id).await?;

    match format {
        OutputFormat::Text => {
            if sub_items.is_empty() {
                println!("No sub-items");
            }
            for sub in &sub_items {
                let number = sub.number.map(|n| n.to_string()).unwrap_or_default();
                println!("  {:<8} {:<24} {}", number, sub.id, sub.title);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sub_items)?),
    }
    Ok(())
}

/// List the contents of a sub-item
pub async fn handle_contents(
    orchestrator: &Orchestrator,
    id: &str,
    sub_item_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let source = ensure_installed(orchestrator, id).await?;
    let contents = source.list_sub_item_contents(sub_item_id).await?;

    match format {
        OutputFormat::Text => {
            for content in &contents {
                let body = content
                    .url
                    .as_deref()
                    .or(content.text.as_deref())
                    .unwrap_or("");
                println!("  {:>4}  {}", content.index, body);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&contents)?),
    }
    Ok(())
}

/// Search through a source
pub async fn handle_search(
    orchestrator: &Orchestrator,
    id: &str,
    query: &str,
    format: OutputFormat,
) -> Result<()> {
    let source = ensure_installed(orchestrator, id).await?;
    let items = source.search(query).await?;

    match format {
        OutputFormat::Text => {
            println!("{} result(s) for \"{}\" in {}:", items.len(), query, source.name());
            println!();
            for item in &items {
                print_item(item, false);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
    }
    Ok(())
}

/// Install `ids`, then report which have newer catalog versions
pub async fn handle_updates(orchestrator: &Orchestrator, ids: &[String], format: OutputFormat) -> Result<()> {
    for id in ids {
        ensure_installed(orchestrator, id).await?;
    }
    let updates = orchestrator.check_updates().await?;

    match format {
        OutputFormat::Text => {
            if updates.is_empty() {
                println!("All installed sources are up to date");
            }
            for update in &updates {
                let breaking = if update.breaking { " (breaking)" } else { "" };
                println!(
                    "  {:<20} {} -> {}{}",
                    update.id, update.installed, update.available, breaking
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&updates)?),
    }
    Ok(())
}

/// Print the effective configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", toml::to_string_pretty(config)?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

/// Print where the configuration lives
pub fn handle_config_path(path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", path.display()),
        OutputFormat::Json => println!("{}", json!({ "path": path })),
    }
    Ok(())
}

async fn ensure_installed(orchestrator: &Orchestrator, id: &str) -> Result<Arc<dyn ContentSource>> {
    if let Some(source) = orchestrator.registry().get(id) {
        return Ok(source);
    }
    orchestrator
        .install(id, |percent, status| {
            tracing::debug!(source_id = %id, percent, status, "Install progress");
        })
        .await
        .with_context(|| format!("Failed to install '{}'", id))
}

fn optional_capabilities(orchestrator: &Orchestrator, id: &str) -> Vec<String> {
    let Some(source) = orchestrator.registry().get(id) else {
        return Vec::new();
    };
    Capability::OPTIONAL
        .into_iter()
        .filter(|cap| source.supports(*cap))
        .map(|cap| cap.to_string())
        .collect()
}

fn print_item(item: &Item, full: bool) {
    println!("{} [{}]", item.title, item.id);
    if !item.url.is_empty() {
        println!("  {}", item.url);
    }
    if !full {
        return;
    }
    if !item.authors.is_empty() {
        println!("  By: {}", item.authors.join(", "));
    }
    if !item.genres.is_empty() {
        println!("  Genres: {}", item.genres.join(", "));
    }
    if let Some(status) = &item.status {
        println!("  Status: {}", status);
    }
    if let Some(description) = &item.description {
        println!();
        println!("{}", description);
    }
}
