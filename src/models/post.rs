use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

/// One canonical ingested article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Option<i64>,
    pub feed_id: Option<i64>,
    pub title: Option<String>,
    pub url: String,
    pub pubdate: Option<DateTime<Utc>>,
    pub content: String,
    pub tags: Vec<String>,
    /// SHA-256 of `content`. The store recomputes it on every save.
    pub signature: String,
    pub language: Option<String>,
    pub mimetype: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    /// Entry fields with no column of their own.
    pub extra: BTreeMap<String, Value>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Post {
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut post = Self {
            id: None,
            feed_id: None,
            title: None,
            url: url.into(),
            pubdate: None,
            content: content.into(),
            tags: Vec::new(),
            signature: String::new(),
            language: None,
            mimetype: None,
            author: None,
            summary: None,
            extra: BTreeMap::new(),
            created: now,
            updated: now,
        };
        post.signature = post.hash();
        post
    }

    /// Lowercase hex SHA-256 digest of the UTF-8 content.
    pub fn hash(&self) -> String {
        signature(&self.content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(AppError::Validation("post url is required".to_string()));
        }
        if self.content.is_empty() {
            return Err(AppError::Validation(format!(
                "post {} has no content",
                self.url
            )));
        }
        Ok(())
    }

    /// Content as written to an exported corpus file.
    pub fn htmlize(&self) -> &str {
        &self.content
    }
}

pub fn signature(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.title {
            Some(title) if !title.is_empty() => f.write_str(title),
            _ => f.write_str(&self.url),
        }
    }
}
