//! Reading feed lists from OPML files.
//!
//! Top-level outlines are categories; every nested outline carrying an
//! `xmlUrl` is a feed in that category.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use ::opml::{Outline, OPML};
use anyhow::Context;

use crate::db::Repository;
use crate::error::Result;
use crate::models::{Counter, Feed};

/// Category given to feeds listed directly under the OPML body.
pub const UNCATEGORIZED: &str = "uncategorized";

pub type OutlineAttrs = BTreeMap<String, String>;

pub struct OpmlReader {
    path: PathBuf,
}

impl OpmlReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn document(&self) -> Result<OPML> {
        let xml = std::fs::read_to_string(&self.path)
            .with_context(|| format!("could not read OPML file {}", self.path.display()))?;
        Ok(OPML::from_str(&xml)?)
    }

    /// Names of the top-level category outlines.
    pub fn categories(&self) -> Result<Vec<String>> {
        Ok(self
            .document()?
            .body
            .outlines
            .iter()
            .filter(|topic| !topic.outlines.is_empty())
            .map(category_name)
            .collect())
    }

    /// Attribute maps of every feed outline, each with its `category`.
    pub fn feeds(&self) -> Result<Vec<OutlineAttrs>> {
        Ok(outlines_of(&self.document()?))
    }

    /// Number of feeds per category.
    pub fn counts(&self) -> Result<Counter> {
        let mut counts = Counter::new();
        for feed in self.feeds()? {
            if let Some(category) = feed.get("category") {
                counts.incr(category);
            }
        }
        Ok(counts)
    }
}

impl fmt::Display for OpmlReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.counts() {
            Ok(counts) => write!(
                f,
                "OPML with {} categories and {} feeds",
                counts.len(),
                counts.total()
            ),
            Err(_) => write!(f, "OPML at {}", self.path.display()),
        }
    }
}

/// Parses feed outlines out of an OPML file.
pub fn parse_opml_file(path: &Path) -> Result<Vec<OutlineAttrs>> {
    OpmlReader::new(path).feeds()
}

pub fn parse_opml_str(xml: &str) -> Result<Vec<OutlineAttrs>> {
    Ok(outlines_of(&OPML::from_str(xml)?))
}

fn outlines_of(document: &OPML) -> Vec<OutlineAttrs> {
    let mut feeds = Vec::new();
    for topic in &document.body.outlines {
        if topic.outlines.is_empty() {
            if topic.xml_url.is_some() {
                let category = topic.category.as_deref().unwrap_or(UNCATEGORIZED);
                feeds.push(attributes(topic, category));
            }
            continue;
        }

        let category = category_name(topic);
        collect_feeds(&topic.outlines, &category, &mut feeds);
    }
    feeds
}

fn collect_feeds(outlines: &[Outline], category: &str, feeds: &mut Vec<OutlineAttrs>) {
    for outline in outlines {
        if outline.xml_url.is_some() {
            feeds.push(attributes(outline, category));
        }
        collect_feeds(&outline.outlines, category, feeds);
    }
}

fn category_name(topic: &Outline) -> String {
    topic
        .title
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| topic.text.clone())
}

fn attributes(outline: &Outline, category: &str) -> OutlineAttrs {
    let mut attrs = OutlineAttrs::new();
    attrs.insert("text".to_string(), outline.text.clone());
    let optional = [
        ("title", &outline.title),
        ("type", &outline.r#type),
        ("xmlUrl", &outline.xml_url),
        ("htmlUrl", &outline.html_url),
        ("description", &outline.description),
        ("language", &outline.language),
        ("version", &outline.version),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            attrs.insert(key.to_string(), value.clone());
        }
    }
    attrs.insert("category".to_string(), category.to_string());
    attrs
}

/// Saves every feed in the OPML file; returns how many were inserted.
///
/// Feeds whose link is already stored are skipped silently.
pub async fn load_opml(store: &Repository, path: &Path) -> Result<u64> {
    let mut rows = 0;
    for outline in parse_opml_file(path)? {
        let mut feed = Feed::from_outline(&outline)?;
        match store.save_feed(&mut feed).await {
            Ok(_) => rows += 1,
            Err(e) if e.is_not_unique() => {
                tracing::debug!("Skipping known feed {}", feed.link);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(rows)
}
