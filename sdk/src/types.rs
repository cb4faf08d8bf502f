//! Content types returned by sources, and the capability vocabulary

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Details of a single catalog item (a series, a book, a show)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// A sub-division of an item (a chapter, an episode)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubItem {
    pub id: String,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub number: Option<f64>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
}

/// One piece of content inside a sub-item (a page image, a text block)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub index: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Members a source may expose, by the name plugins use for them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    FetchItemDetails,
    ListSubItems,
    ListSubItemContents,
    Search,
    ListGenres,
    Trending,
    Latest,
    Popular,
    ByPage,
}

impl Capability {
    /// Members every source must implement
    pub const REQUIRED: [Capability; 3] = [
        Capability::FetchItemDetails,
        Capability::ListSubItems,
        Capability::ListSubItemContents,
    ];

    /// Members detected by probing the live instance
    pub const OPTIONAL: [Capability; 6] = [
        Capability::Search,
        Capability::ListGenres,
        Capability::Trending,
        Capability::Latest,
        Capability::Popular,
        Capability::ByPage,
    ];

    /// Member name on the plugin instance
    pub fn member_name(&self) -> &'static str {
        match self {
            Self::FetchItemDetails => "fetch_item_details",
            Self::ListSubItems => "list_sub_items",
            Self::ListSubItemContents => "list_sub_item_contents",
            Self::Search => "search",
            Self::ListGenres => "list_genres",
            Self::Trending => "get_trending",
            Self::Latest => "get_latest",
            Self::Popular => "get_popular",
            Self::ByPage => "get_by_page",
        }
    }

    pub fn is_required(&self) -> bool {
        Self::REQUIRED.contains(self)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.member_name())
    }
}

impl FromStr for Capability {
    type Err = String;

    /// Accepts member names as well as the short aliases used in catalogs
    /// (`trending`, `latest`, `popular`, `byPage`, `genres`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cap = match s {
            "fetch_item_details" => Self::FetchItemDetails,
            "list_sub_items" => Self::ListSubItems,
            "list_sub_item_contents" => Self::ListSubItemContents,
            "search" => Self::Search,
            "list_genres" | "genres" | "listGenres" => Self::ListGenres,
            "get_trending" | "trending" | "getTrending" => Self::Trending,
            "get_latest" | "latest" | "getLatest" => Self::Latest,
            "get_popular" | "popular" | "getPopular" => Self::Popular,
            "get_by_page" | "by_page" | "byPage" | "getByPage" => Self::ByPage,
            other => return Err(format!("unknown capability '{}'", other)),
        };
        Ok(cap)
    }
}
