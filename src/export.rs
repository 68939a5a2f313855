//! Writes the stored corpus to disk, one directory per category.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{Counter, Post};

/// How much of a post's markup survives export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SanitizeLevel {
    /// Content exactly as stored.
    Raw,
    /// Script and style blocks and comments removed.
    #[default]
    Safe,
    /// Plain text rendering.
    Text,
}

impl FromStr for SanitizeLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "safe" => Ok(Self::Safe),
            "text" => Ok(Self::Text),
            other => Err(AppError::Validation(format!(
                "unknown sanitize level {other:?}, expected raw, safe or text"
            ))),
        }
    }
}

impl fmt::Display for SanitizeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Safe => write!(f, "safe"),
            Self::Text => write!(f, "text"),
        }
    }
}

fn strip_unsafe(html: &str) -> String {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->").ok()
    });
    match re {
        Some(re) => re.replace_all(html, "").into_owned(),
        None => html.to_string(),
    }
}

/// Renders post content at the given level.
pub fn sanitize(content: &str, level: SanitizeLevel) -> String {
    match level {
        SanitizeLevel::Raw => content.to_string(),
        SanitizeLevel::Safe => strip_unsafe(content),
        SanitizeLevel::Text => {
            let cleaned = strip_unsafe(content);
            match html2text::from_read(cleaned.as_bytes(), 80) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!("Failed to convert HTML to text: {}", e);
                    cleaned
                }
            }
        }
    }
}

/// Directory name for a category, always a single path component.
pub fn category_dir(category: &str) -> Result<String> {
    let name: String = category
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            c => c,
        })
        .collect();
    match name.as_str() {
        "" | "." | ".." => Err(AppError::Validation(format!(
            "cannot export category {category:?} as a directory"
        ))),
        _ => Ok(name),
    }
}

pub struct Exporter {
    store: Repository,
    categories: Option<Vec<String>>,
    level: SanitizeLevel,
}

impl Exporter {
    pub fn new(store: Repository) -> Self {
        Self {
            store,
            categories: None,
            level: SanitizeLevel::default(),
        }
    }

    /// Restricts the export to these categories; empty means all.
    pub fn categories(mut self, categories: Vec<String>) -> Self {
        self.categories = if categories.is_empty() {
            None
        } else {
            Some(categories)
        };
        self
    }

    pub fn level(mut self, level: SanitizeLevel) -> Self {
        self.level = level;
        self
    }

    /// Exports into `root`, creating it when missing. Returns posts per category.
    pub async fn export(&self, root: &Path) -> Result<Counter> {
        if root.exists() && !root.is_dir() {
            return Err(AppError::Validation(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        fs::create_dir_all(root)?;

        let categories = match &self.categories {
            Some(categories) => categories.clone(),
            None => self.store.categories().await?,
        };

        let mut counts = Counter::new();
        for category in &categories {
            let posts = self.store.posts_for_category(category).await?;
            let dir = root.join(category_dir(category)?);
            fs::create_dir_all(&dir)?;
            write_posts(&dir, &posts, self.level)?;
            counts.set(category, posts.len() as u64);
            tracing::info!("Exported {} posts in {}", posts.len(), category);
        }

        fs::write(root.join("README"), readme(&counts))?;
        Ok(counts)
    }
}

fn write_posts(dir: &Path, posts: &[Post], level: SanitizeLevel) -> Result<()> {
    for (idx, post) in posts.iter().enumerate() {
        let path: PathBuf = dir.join(format!("{idx:03}.html"));
        fs::write(&path, sanitize(post.htmlize(), level))?;
    }
    Ok(())
}

fn readme(counts: &Counter) -> String {
    let mut out = String::from("Krill RSS Export\n================\n\n");
    out.push_str(&format!(
        "These feeds were exported on {}\n\n",
        Local::now().format("%b %d, %Y at %H:%M")
    ));
    out.push_str(&format!(
        "There are {} posts in {} categories in this corpus as follows:\n",
        counts.total(),
        counts.len()
    ));
    for (category, posts) in counts.iter() {
        out.push_str(&format!("   {category}: {posts} posts\n"));
    }
    out
}
