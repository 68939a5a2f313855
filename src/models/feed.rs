use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// Outline attribute holding the feed URL.
pub const XML_URL: &str = "xmlUrl";
/// Outline attribute holding the site URL.
pub const HTML_URL: &str = "htmlUrl";

/// A subscribed RSS/Atom source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: Option<i64>,
    pub link: String,
    pub title: Option<String>,
    pub version: Option<String>,
    pub etag: Option<String>,
    /// Last-Modified header value, sent back verbatim on the next fetch.
    pub modified: Option<String>,
    pub urls: BTreeMap<String, String>,
    /// Feed level metadata merged in by synchronization.
    pub meta: BTreeMap<String, Value>,
    pub category: String,
    pub active: bool,
    pub fetched: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Feed {
    pub fn new(link: impl Into<String>, category: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            link: link.into(),
            title: None,
            version: None,
            etag: None,
            modified: None,
            urls: BTreeMap::new(),
            meta: BTreeMap::new(),
            category: category.into(),
            active: true,
            fetched: None,
            created: now,
            updated: now,
        }
    }

    /// Builds an unsaved feed from OPML outline attributes.
    ///
    /// The outline must carry `xmlUrl` and `category`; `title` falls back to `text`.
    pub fn from_outline(outline: &BTreeMap<String, String>) -> Result<Self> {
        let link = outline
            .get(XML_URL)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| AppError::FeedType(format!("outline has no {XML_URL}")))?;
        let category = outline
            .get("category")
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::Validation(format!("feed {link} has no category")))?;

        let mut feed = Feed::new(link.clone(), category.clone());
        feed.title = outline.get("title").or_else(|| outline.get("text")).cloned();
        feed.urls.insert(XML_URL.to_string(), link.clone());
        if let Some(html) = outline.get(HTML_URL) {
            feed.urls.insert(HTML_URL.to_string(), html.clone());
        }
        for (key, value) in outline {
            if !matches!(key.as_str(), "xmlUrl" | "htmlUrl" | "category" | "title" | "text") {
                feed.meta.insert(key.clone(), Value::String(value.clone()));
            }
        }
        Ok(feed)
    }

    pub fn xml_url(&self) -> &str {
        &self.link
    }

    pub fn html_url(&self) -> Option<&str> {
        self.urls
            .get(HTML_URL)
            .or_else(|| self.urls.get("htmlurl"))
            .map(String::as_str)
    }

    pub fn validate(&self) -> Result<()> {
        if self.link.trim().is_empty() {
            return Err(AppError::Validation("feed link is required".to_string()));
        }
        if self.category.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "feed {} has no category",
                self.link
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.title {
            Some(title) if !title.is_empty() => f.write_str(title),
            _ => f.write_str(&self.link),
        }
    }
}
