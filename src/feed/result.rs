//! Backend-neutral shape of a parsed feed.
//!
//! Entries stay "raw" here: field names mirror what feed documents carry and
//! nothing is normalized until a [`PostWrangler`](crate::wrangle::PostWrangler)
//! turns one into a post.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status reported when a conditional fetch found nothing new.
pub const NOT_MODIFIED: u16 = 304;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub entries: Vec<RawEntry>,
    pub feed: RawFeedMeta,
    pub etag: Option<String>,
    pub modified: Option<String>,
    pub version: Option<String>,
    /// Final URL when the request was redirected.
    pub href: Option<String>,
    pub status: u16,
}

impl ParseResult {
    /// The empty result of a `304 Not Modified` response.
    pub fn not_modified() -> Self {
        Self {
            status: NOT_MODIFIED,
            ..Default::default()
        }
    }

    /// True only for a conditional fetch that reported no change. A fresh
    /// response with zero entries is not unchanged.
    pub fn is_unchanged(&self) -> bool {
        self.entries.is_empty() && self.status == NOT_MODIFIED
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFeedMeta {
    pub title: Option<String>,
    pub link: Option<String>,
    pub links: Vec<RawLink>,
    /// Remaining feed level fields keyed by name.
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLink {
    pub rel: Option<String>,
    pub href: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub href: Option<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub content: Option<Vec<RawContent>>,
    pub tags: Option<Vec<RawTag>>,
    /// Remaining entry fields keyed by name.
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawContent {
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    pub value: String,
    pub language: Option<String>,
}

impl RawContent {
    pub fn new(content_type: &str, value: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.to_string()),
            value: value.into(),
            language: None,
        }
    }

    pub fn is_html(&self) -> bool {
        self.content_type.as_deref() == Some("text/html")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTag {
    pub term: String,
    pub scheme: Option<String>,
    pub label: Option<String>,
}

impl RawTag {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            scheme: None,
            label: None,
        }
    }
}
