//! Feed sources and ingested feed items.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::machine::Roster;

/// How a source's content is structured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Rss,
    Atom,
    /// Scrape an HTML page using configured tag paths
    Html,
    /// JSON document, rendered as tagged markup before extraction
    Json,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Rss => "rss",
            FeedKind::Atom => "atom",
            FeedKind::Html => "html",
            FeedKind::Json => "json",
        }
    }
}

/// A configured feed source with its field-extraction paths.
///
/// Paths are slash-separated tag names; a trailing `@attr` segment selects an
/// attribute of the last matched element (e.g. `link/@href`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FeedSource {
    /// Unique source name; also the partition key
    pub name: String,
    pub url: String,
    pub kind: FeedKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid_path: Option<String>,
}

impl FeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, kind: FeedKind) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            kind,
            channel_path: None,
            item_path: None,
            title_path: None,
            link_path: None,
            description_path: None,
            date_path: None,
            image_path: None,
            guid_path: None,
        }
    }

    /// Fill unset paths with the defaults for the source kind and clean up
    /// user-supplied ones (`//item/` becomes `item`).
    pub fn normalized(&self) -> Self {
        let (channel, item, title, link, description, date, guid) = match self.kind {
            FeedKind::Rss => ("channel", "item", "title", "link", "description", "pubDate", "guid"),
            FeedKind::Atom => ("feed", "entry", "title", "link/@href", "summary", "updated", "id"),
            FeedKind::Html => ("body", "article", "h2", "a/@href", "p", "time/@datetime", ""),
            FeedKind::Json => ("", "items", "title", "link", "description", "date", "id"),
        };
        let pick = |value: &Option<String>, default: &str| -> Option<String> {
            let chosen = value.as_deref().map(normalize_path).unwrap_or_else(|| normalize_path(default));
            if chosen.is_empty() {
                None
            } else {
                Some(chosen)
            }
        };
        Self {
            name: self.name.trim().to_string(),
            url: self.url.trim().to_string(),
            kind: self.kind,
            channel_path: pick(&self.channel_path, channel),
            item_path: pick(&self.item_path, item),
            title_path: pick(&self.title_path, title),
            link_path: pick(&self.link_path, link),
            description_path: pick(&self.description_path, description),
            date_path: pick(&self.date_path, date),
            image_path: self.image_path.as_deref().map(normalize_path).filter(|p| !p.is_empty()),
            guid_path: pick(&self.guid_path, guid),
        }
    }
}

/// Collapse repeated slashes and trim leading/trailing ones.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Hash used as the unique key of a feed item.
pub fn guid_hash(guid: &str) -> String {
    let digest = Sha256::digest(guid.trim().as_bytes());
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// One ingested feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub guid_hash: String,
    pub title: String,
    pub link: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_link: Option<String>,
    pub pub_date: DateTime<Utc>,
    pub source_name: String,
}

/// Work handed to a feed worker: its shard plus the roster it was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedShard {
    pub roster: Roster,
    pub sources: Vec<FeedSource>,
}

/// Per-shard ingestion summary reported back to the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedReport {
    pub sources: Vec<String>,
    pub inserted: usize,
    pub skipped: usize,
    pub failed_sources: Vec<String>,
}
