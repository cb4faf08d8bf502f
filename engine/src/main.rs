// Quire source loader
// Main entry point for the quire binary

use clap::Parser;
use quire_engine::cli::{Cli, Command, ConfigAction};
use quire_engine::config::Config;
use quire_engine::handlers::{
    handle_catalog, handle_config_path, handle_config_show, handle_contents, handle_details,
    handle_info, handle_install, handle_search, handle_sub_items, handle_updates, CatalogFilter,
    OutputFormat,
};
use quire_engine::orchestrator::Orchestrator;
use quire_engine::registry::PluginRegistry;
use quire_engine::telemetry::init_telemetry_with_level;
use sdk::errors::{SourceError, SourceErrorExt};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    let config = Config::load_or_create_at(&config_path)?;

    // RUST_LOG wins over --log, which wins over the config file
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    tracing::debug!(
        "Quire v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Show => handle_config_show(&config, format),
            ConfigAction::Path => handle_config_path(&config_path, format),
        };
    }

    let registry = Arc::new(PluginRegistry::new());
    let orchestrator = Orchestrator::from_config(&config, registry)?;

    let result = match cli.command {
        Command::Catalog {
            refresh,
            tag,
            search,
            featured,
        } => {
            let filter = CatalogFilter {
                refresh,
                tag,
                search,
                featured,
                include_nsfw: config.sources.include_nsfw,
            };
            handle_catalog(&orchestrator, &filter, format).await
        }
        Command::Info { id } => handle_info(&orchestrator, &id, format).await,
        Command::Install { id } => handle_install(&orchestrator, &id, format).await,
        Command::Details { id, item } => handle_details(&orchestrator, &id, &item, format).await,
        Command::SubItems { id, item } => handle_sub_items(&orchestrator, &id, &item, format).await,
        Command::Contents { id, sub_item } => {
            handle_contents(&orchestrator, &id, &sub_item, format).await
        }
        Command::Search { id, query } => handle_search(&orchestrator, &id, &query, format).await,
        Command::Updates { ids } => handle_updates(&orchestrator, &ids, format).await,
        Command::Config { .. } => Ok(()),
    };

    orchestrator.shutdown();

    if let Err(err) = &result {
        if let Some(source_err) = err.downcast_ref::<SourceError>() {
            tracing::debug!(recoverable = source_err.is_recoverable(), "Command failed");
            eprintln!("hint: {}", source_err.user_hint());
        }
    }
    result
}
