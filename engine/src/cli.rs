//! CLI interface for Quire
//!
//! Command-line front end over the plugin orchestrator, using clap's derive
//! API. The registry is in-memory, so commands that talk to a source install
//! it first within the same process.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Quire source loader
///
/// Browses the published source catalog and loads content sources after
/// verifying their integrity and validating their code.
#[derive(Parser, Debug)]
#[command(name = "quire")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List sources in the catalog
    Catalog {
        /// Bypass the manifest cache
        #[arg(long)]
        refresh: bool,

        /// Only show sources carrying this tag
        #[arg(long, value_name = "TAG")]
        tag: Option<String>,

        /// Filter by name, description or tag
        #[arg(long, value_name = "QUERY")]
        search: Option<String>,

        /// Only show featured sources
        #[arg(long)]
        featured: bool,
    },

    /// Show the catalog entry of a source
    Info {
        /// Source id
        id: String,
    },

    /// Download, verify and load a source
    Install {
        /// Source id
        id: String,
    },

    /// Fetch item details through a source
    Details {
        /// Source id
        id: String,
        /// Item id
        item: String,
    },

    /// List the sub-items of an item
    SubItems {
        /// Source id
        id: String,
        /// Item id
        item: String,
    },

    /// List the contents of a sub-item
    Contents {
        /// Source id
        id: String,
        /// Sub-item id
        sub_item: String,
    },

    /// Search through a source
    Search {
        /// Source id
        id: String,
        /// Search query
        query: String,
    },

    /// Compare installed sources against the catalog
    Updates {
        /// Sources to install before checking
        ids: Vec<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Print the configuration file path
    Path,
}
