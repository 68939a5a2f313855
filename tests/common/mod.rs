//! Test doubles for the feed and page backends.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use krill::db::Repository;
use krill::error::{AppError, Result};
use krill::feed::{Conditional, FeedBackend, ParseResult, RawContent, RawEntry};
use krill::ingest::{IngestOptions, Ingestor};
use krill::models::Feed;
use krill::services::PageFetcher;

/// Serves canned parse results by URL; unknown URLs answer 404.
#[derive(Default)]
pub struct StubBackend {
    results: HashMap<String, ParseResult>,
    failures: HashMap<String, u16>,
    seen: Mutex<Vec<(String, Conditional)>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(mut self, url: &str, result: ParseResult) -> Self {
        self.results.insert(url.to_string(), result);
        self
    }

    pub fn fail(mut self, url: &str, status: u16) -> Self {
        self.failures.insert(url.to_string(), status);
        self
    }

    /// Every request made so far, in order.
    pub fn requests(&self) -> Vec<(String, Conditional)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedBackend for StubBackend {
    async fn parse(&self, url: &str, conditional: &Conditional) -> Result<ParseResult> {
        self.seen
            .lock()
            .unwrap()
            .push((url.to_string(), conditional.clone()));

        if let Some(status) = self.failures.get(url) {
            return Err(AppError::HttpStatus {
                url: url.to_string(),
                status: *status,
            });
        }
        self.results.get(url).cloned().ok_or_else(|| AppError::HttpStatus {
            url: url.to_string(),
            status: 404,
        })
    }
}

/// Answers every page request with a body derived from the URL, except
/// those marked as failing.
#[derive(Default)]
pub struct StubPages {
    failing: Vec<String>,
    fetched: Mutex<Vec<String>>,
}

impl StubPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.push(url.to_string());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for StubPages {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.fetched.lock().unwrap().push(url.to_string());
        if self.failing.iter().any(|failing| failing == url) {
            return Err(AppError::HttpStatus {
                url: url.to_string(),
                status: 500,
            });
        }
        Ok(page_for(url))
    }
}

pub fn page_for(url: &str) -> String {
    format!("<html><body><p>Full text of {url}</p></body></html>")
}

pub fn entry(url: &str, content: &str) -> RawEntry {
    RawEntry {
        id: Some(format!("{url}#guid")),
        title: Some(format!("Post at {url}")),
        link: Some(url.to_string()),
        published: Some("Thu, 27 Dec 2012 12:53:12 -0500".to_string()),
        content: Some(vec![RawContent::new("text/html", content)]),
        ..Default::default()
    }
}

pub fn feed_result(entries: Vec<RawEntry>) -> ParseResult {
    ParseResult {
        entries,
        status: 200,
        etag: Some("\"abc\"".to_string()),
        version: Some("rss20".to_string()),
        ..Default::default()
    }
}

pub async fn store_with_feeds(feeds: &[(&str, &str)]) -> (Repository, Vec<Feed>) {
    let store = Repository::open_in_memory().await.unwrap();
    let mut saved = Vec::new();
    for (link, category) in feeds {
        let mut feed = Feed::new(*link, *category);
        store.save_feed(&mut feed).await.unwrap();
        saved.push(feed);
    }
    (store, saved)
}

pub fn ingestor(
    store: &Repository,
    backend: Arc<StubBackend>,
    pages: Arc<StubPages>,
    fetch_html: bool,
    workers: usize,
) -> Ingestor {
    Ingestor::new(
        "test",
        store.clone(),
        backend,
        pages,
        IngestOptions {
            fetch_html,
            workers,
        },
    )
}
