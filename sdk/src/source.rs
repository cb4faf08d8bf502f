//! Content source trait
//!
//! This module defines the `ContentSource` trait that every loaded plugin
//! instance is exposed through. Required members are always present on a
//! registered instance; optional members are detected at runtime with
//! [`ContentSource::is_callable`] and default to `Unsupported`.

use crate::errors::SourceError;
use crate::types::{Capability, Content, Item, SubItem};
use async_trait::async_trait;

/// Trait that all loaded content sources implement
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Unique source identifier
    fn id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    /// Semantic version reported by the instance
    fn version(&self) -> &str;

    /// Root URL of the site the source reads from
    fn base_url(&self) -> &str;

    /// Whether the member named `member` is currently callable
    fn is_callable(&self, member: &str) -> bool;

    /// Whether the instance currently supports `capability`
    fn supports(&self, capability: Capability) -> bool {
        self.is_callable(capability.member_name())
    }

    /// Fetch the details of one item
    async fn fetch_item_details(&self, item_id: &str) -> Result<Item, SourceError>;

    /// List the sub-items (chapters, episodes) of an item
    async fn list_sub_items(&self, item_id: &str) -> Result<Vec<SubItem>, SourceError>;

    /// List the contents (pages) of a sub-item
    async fn list_sub_item_contents(&self, sub_item_id: &str) -> Result<Vec<Content>, SourceError>;

    async fn search(&self, _query: &str) -> Result<Vec<Item>, SourceError> {
        Err(SourceError::Unsupported(Capability::Search.to_string()))
    }

    async fn list_genres(&self) -> Result<Vec<String>, SourceError> {
        Err(SourceError::Unsupported(Capability::ListGenres.to_string()))
    }

    async fn trending(&self, _page: u32) -> Result<Vec<Item>, SourceError> {
        Err(SourceError::Unsupported(Capability::Trending.to_string()))
    }

    async fn latest(&self, _page: u32) -> Result<Vec<Item>, SourceError> {
        Err(SourceError::Unsupported(Capability::Latest.to_string()))
    }

    async fn popular(&self, _page: u32) -> Result<Vec<Item>, SourceError> {
        Err(SourceError::Unsupported(Capability::Popular.to_string()))
    }

    async fn by_page(&self, _page: u32) -> Result<Vec<Item>, SourceError> {
        Err(SourceError::Unsupported(Capability::ByPage.to_string()))
    }
}
