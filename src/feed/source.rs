use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::Context;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{Feed, XML_URL};

/// Something that identifies a feed to synchronize.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedRef {
    /// A bare feed URL.
    Url(String),
    /// OPML outline attributes; the URL lives under `xmlUrl`.
    Struct(BTreeMap<String, String>),
    /// A feed record from the store.
    Model(Feed),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedRefType {
    Url,
    Struct,
    Model,
}

impl FeedRef {
    pub fn resolve_type(&self) -> Result<FeedRefType> {
        match self {
            FeedRef::Url(url) if !url.trim().is_empty() => Ok(FeedRefType::Url),
            FeedRef::Url(_) => Err(AppError::FeedType("empty feed url".to_string())),
            FeedRef::Struct(outline) => match outline.get(XML_URL) {
                Some(url) if !url.trim().is_empty() => Ok(FeedRefType::Struct),
                _ => Err(AppError::FeedType(format!(
                    "outline has no {XML_URL}: {outline:?}"
                ))),
            },
            FeedRef::Model(_) => Ok(FeedRefType::Model),
        }
    }

    /// The URL to fetch. Empty for a struct without `xmlUrl`.
    pub fn url(&self) -> &str {
        match self {
            FeedRef::Url(url) => url,
            FeedRef::Struct(outline) => outline.get(XML_URL).map(String::as_str).unwrap_or(""),
            FeedRef::Model(feed) => feed.xml_url(),
        }
    }

    pub fn as_feed(&self) -> Option<&Feed> {
        match self {
            FeedRef::Model(feed) => Some(feed),
            _ => None,
        }
    }
}

impl From<Feed> for FeedRef {
    fn from(feed: Feed) -> Self {
        FeedRef::Model(feed)
    }
}

impl From<&str> for FeedRef {
    fn from(url: &str) -> Self {
        FeedRef::Url(url.to_string())
    }
}

impl From<String> for FeedRef {
    fn from(url: String) -> Self {
        FeedRef::Url(url)
    }
}

impl From<BTreeMap<String, String>> for FeedRef {
    fn from(outline: BTreeMap<String, String>) -> Self {
        FeedRef::Struct(outline)
    }
}

/// Accepts the shapes found in a JSON feed list: a URL string, an outline
/// object, or a serialized feed record. Anything else is a feed type error.
impl TryFrom<Value> for FeedRef {
    type Error = AppError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(url) => Ok(FeedRef::Url(url)),
            Value::Object(map) if map.contains_key("link") && map.contains_key("created") => {
                let feed: Feed = serde_json::from_value(Value::Object(map))
                    .map_err(|e| AppError::FeedType(format!("not a feed record: {e}")))?;
                Ok(FeedRef::Model(feed))
            }
            Value::Object(map) => {
                let mut outline = BTreeMap::new();
                for (key, value) in map {
                    let value = match value {
                        Value::String(s) => s,
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        other => {
                            return Err(AppError::FeedType(format!(
                                "unsupported value for {key}: {other}"
                            )))
                        }
                    };
                    outline.insert(key, value);
                }
                Ok(FeedRef::Struct(outline))
            }
            other => Err(AppError::FeedType(format!("cannot use {other} as a feed"))),
        }
    }
}

/// Reads a JSON array of feed references from `path`.
pub fn read_feed_list(path: &Path) -> Result<Vec<FeedRef>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("could not read feed list {}", path.display()))?;
    parse_feed_list(&content)
}

pub fn parse_feed_list(json: &str) -> Result<Vec<FeedRef>> {
    match serde_json::from_str::<Value>(json)? {
        Value::Array(items) => items.into_iter().map(FeedRef::try_from).collect(),
        other => Err(AppError::FeedType(format!(
            "a feed list must be a JSON array, not {other}"
        ))),
    }
}

impl fmt::Display for FeedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedRef::Url(url) => f.write_str(url),
            FeedRef::Struct(outline) => match outline.get("title").or_else(|| outline.get("text")) {
                Some(title) => write!(f, "{} ({})", title, self.url()),
                None => f.write_str(self.url()),
            },
            FeedRef::Model(feed) => write!(f, "{} ({})", feed, feed.link),
        }
    }
}
