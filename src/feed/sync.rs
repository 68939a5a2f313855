use std::sync::Arc;

use chrono::Utc;

use super::fetcher::{Conditional, FeedBackend};
use super::result::{ParseResult, RawEntry, RawFeedMeta};
use super::source::{FeedRef, FeedRefType};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::Feed;

/// Feed level fields that synchronization never copies onto a feed record.
const PROTECTED: &[&str] = &[
    "updated",
    "updated_parsed",
    "id",
    "published",
    "published_parsed",
    "category",
];

/// Fetches one feed and folds the response back into its stored record.
pub struct FeedSync {
    feed: FeedRef,
    kind: FeedRefType,
    backend: Arc<dyn FeedBackend>,
    store: Repository,
}

impl FeedSync {
    /// Fails with a feed type error when `feed` cannot be classified.
    pub fn new(feed: FeedRef, backend: Arc<dyn FeedBackend>, store: Repository) -> Result<Self> {
        let kind = feed.resolve_type()?;
        Ok(Self {
            feed,
            kind,
            backend,
            store,
        })
    }

    pub fn kind(&self) -> FeedRefType {
        self.kind
    }

    pub fn feed(&self) -> &FeedRef {
        &self.feed
    }

    pub fn url(&self) -> &str {
        self.feed.url()
    }

    /// Store id of the feed, when synchronizing a stored record.
    pub fn feed_id(&self) -> Option<i64> {
        self.feed.as_feed().and_then(|feed| feed.id)
    }

    /// Fetches the feed, conditionally when the record carries validators.
    pub async fn parse(&self) -> Result<ParseResult> {
        let conditional = match &self.feed {
            FeedRef::Model(feed) => Conditional::for_feed(feed),
            _ => Conditional::None,
        };
        self.backend.parse(self.url(), &conditional).await
    }

    /// Parses the feed and, for stored records, updates and optionally saves it.
    pub async fn sync(&mut self, persist: bool) -> Result<ParseResult> {
        match self.try_sync(persist).await {
            Ok(result) => Ok(result),
            Err(e) => Err(AppError::synchronization(
                format!("could not synchronize {}", self.feed),
                e,
            )),
        }
    }

    async fn try_sync(&mut self, persist: bool) -> Result<ParseResult> {
        let result = self.parse().await?;

        if let FeedRef::Model(feed) = &mut self.feed {
            feed.fetched = Some(Utc::now());

            if let Some(etag) = &result.etag {
                feed.etag = Some(etag.clone());
            }
            if let Some(modified) = &result.modified {
                feed.modified = Some(modified.clone());
            }
            if let Some(version) = &result.version {
                feed.version = Some(version.clone());
            }
            if let Some(href) = &result.href {
                tracing::info!("Feed {} moved to {}", feed.link, href);
                feed.link = href.clone();
            }

            merge_metadata(feed, &result.feed);

            if persist {
                self.store.save_feed(feed).await?;
            }
        }

        Ok(result)
    }

    /// Synchronizes and hands back the raw entries.
    pub async fn entries(&mut self, persist: bool) -> Result<Vec<RawEntry>> {
        Ok(self.sync(persist).await?.entries)
    }
}

fn merge_metadata(feed: &mut Feed, meta: &RawFeedMeta) {
    if let Some(title) = &meta.title {
        feed.title = Some(title.clone());
    }
    if let Some(link) = &meta.link {
        feed.urls.insert("htmlurl".to_string(), link.clone());
    }
    for (idx, link) in meta.links.iter().enumerate() {
        let key = match &link.rel {
            Some(rel) => format!("{rel}{idx}"),
            None => format!("link{idx}"),
        };
        feed.urls.insert(key, link.href.clone());
    }
    for (key, value) in &meta.extra {
        if !PROTECTED.contains(&key.as_str()) {
            feed.meta.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::feed::result::{RawLink, NOT_MODIFIED};

    struct RecordingBackend {
        result: Option<ParseResult>,
        seen: Mutex<Vec<Conditional>>,
    }

    impl RecordingBackend {
        fn returning(result: ParseResult) -> Arc<Self> {
            Arc::new(Self {
                result: Some(result),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                result: None,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FeedBackend for RecordingBackend {
        async fn parse(&self, url: &str, conditional: &Conditional) -> Result<ParseResult> {
            self.seen.lock().unwrap().push(conditional.clone());
            self.result.clone().ok_or_else(|| AppError::HttpStatus {
                url: url.to_string(),
                status: 500,
            })
        }
    }

    fn fresh_result() -> ParseResult {
        let mut result = ParseResult {
            status: 200,
            etag: Some("\"v2\"".to_string()),
            modified: Some("Tue, 03 Mar 2015 10:00:00 GMT".to_string()),
            version: Some("rss20".to_string()),
            entries: vec![RawEntry::default()],
            ..Default::default()
        };
        result.feed.title = Some("Book Reviews".to_string());
        result.feed.link = Some("http://books.example.com/".to_string());
        result.feed.links = vec![
            RawLink {
                rel: Some("alternate".to_string()),
                href: "http://books.example.com/".to_string(),
            },
            RawLink {
                rel: None,
                href: "http://books.example.com/rss".to_string(),
            },
        ];
        result
            .feed
            .extra
            .insert("language".to_string(), Value::String("en".to_string()));
        result
            .feed
            .extra
            .insert("updated".to_string(), Value::String("2015-03-03".to_string()));
        result
            .feed
            .extra
            .insert("category".to_string(), Value::String("fiction".to_string()));
        result
    }

    async fn stored_feed(store: &Repository) -> Feed {
        let mut feed = Feed::new("http://books.example.com/rss", "books");
        store.save_feed(&mut feed).await.unwrap();
        feed
    }

    #[tokio::test]
    async fn test_parse_is_conditional_for_stored_feeds() {
        let store = Repository::open_in_memory().await.unwrap();
        let mut feed = stored_feed(&store).await;
        feed.etag = Some("\"v1\"".to_string());
        feed.modified = Some("Mon, 02 Mar 2015 10:00:00 GMT".to_string());

        let backend = RecordingBackend::returning(fresh_result());
        let sync = FeedSync::new(feed.into(), backend.clone(), store).unwrap();
        sync.parse().await.unwrap();

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[Conditional::Etag("\"v1\"".to_string())]);
    }

    #[tokio::test]
    async fn test_parse_is_unconditional_for_urls() {
        let store = Repository::open_in_memory().await.unwrap();
        let backend = RecordingBackend::returning(fresh_result());
        let sync = FeedSync::new("http://books.example.com/rss".into(), backend.clone(), store)
            .unwrap();
        assert_eq!(sync.kind(), FeedRefType::Url);
        sync.parse().await.unwrap();

        assert_eq!(backend.seen.lock().unwrap().as_slice(), &[Conditional::None]);
    }

    #[tokio::test]
    async fn test_sync_updates_and_persists_feed() {
        let store = Repository::open_in_memory().await.unwrap();
        let feed = stored_feed(&store).await;
        let id = feed.id.unwrap();

        let mut sync = FeedSync::new(
            feed.into(),
            RecordingBackend::returning(fresh_result()),
            store.clone(),
        )
        .unwrap();
        let result = sync.sync(true).await.unwrap();
        assert_eq!(result.entries.len(), 1);

        let stored = store.get_feed(id).await.unwrap().unwrap();
        assert!(stored.fetched.is_some());
        assert_eq!(stored.etag.as_deref(), Some("\"v2\""));
        assert_eq!(stored.modified.as_deref(), Some("Tue, 03 Mar 2015 10:00:00 GMT"));
        assert_eq!(stored.version.as_deref(), Some("rss20"));
        assert_eq!(stored.title.as_deref(), Some("Book Reviews"));
        assert_eq!(stored.html_url(), Some("http://books.example.com/"));
        assert_eq!(
            stored.urls.get("alternate0").map(String::as_str),
            Some("http://books.example.com/")
        );
        assert_eq!(
            stored.urls.get("link1").map(String::as_str),
            Some("http://books.example.com/rss")
        );
        assert_eq!(stored.meta.get("language"), Some(&Value::String("en".to_string())));
        assert!(!stored.meta.contains_key("updated"));
        assert!(!stored.meta.contains_key("category"));
        assert_eq!(stored.category, "books");
    }

    #[tokio::test]
    async fn test_sync_without_persist_leaves_store_alone() {
        let store = Repository::open_in_memory().await.unwrap();
        let feed = stored_feed(&store).await;
        let id = feed.id.unwrap();

        let mut sync = FeedSync::new(
            feed.into(),
            RecordingBackend::returning(fresh_result()),
            store.clone(),
        )
        .unwrap();
        sync.sync(false).await.unwrap();

        assert_eq!(sync.feed().as_feed().unwrap().etag.as_deref(), Some("\"v2\""));
        assert!(store.get_feed(id).await.unwrap().unwrap().etag.is_none());
    }

    #[tokio::test]
    async fn test_sync_follows_redirect() {
        let store = Repository::open_in_memory().await.unwrap();
        let feed = stored_feed(&store).await;
        let id = feed.id.unwrap();

        let mut result = fresh_result();
        result.href = Some("https://books.example.com/feed.xml".to_string());
        let mut sync =
            FeedSync::new(feed.into(), RecordingBackend::returning(result), store.clone()).unwrap();
        sync.sync(true).await.unwrap();

        let stored = store.get_feed(id).await.unwrap().unwrap();
        assert_eq!(stored.link, "https://books.example.com/feed.xml");
    }

    #[tokio::test]
    async fn test_unchanged_sync_still_marks_fetched() {
        let store = Repository::open_in_memory().await.unwrap();
        let mut feed = stored_feed(&store).await;
        feed.etag = Some("\"v1\"".to_string());
        let id = feed.id.unwrap();

        let mut sync = FeedSync::new(
            feed.into(),
            RecordingBackend::returning(ParseResult::not_modified()),
            store.clone(),
        )
        .unwrap();
        let result = sync.sync(true).await.unwrap();
        assert_eq!(result.status, NOT_MODIFIED);
        assert!(result.is_unchanged());

        let stored = store.get_feed(id).await.unwrap().unwrap();
        assert!(stored.fetched.is_some());
        assert_eq!(stored.etag.as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn test_sync_failure_is_wrapped() {
        let store = Repository::open_in_memory().await.unwrap();
        let mut sync =
            FeedSync::new("http://down.example.com/rss".into(), RecordingBackend::failing(), store)
                .unwrap();

        let err = sync.entries(true).await.unwrap_err();
        assert_eq!(err.classify(), "SynchronizationError (HTTPStatusError)");
        assert!(err.to_string().contains("http://down.example.com/rss"));
    }

    #[tokio::test]
    async fn test_unclassifiable_ref_fails_construction() {
        let store = Repository::open_in_memory().await.unwrap();
        let err = FeedSync::new(
            FeedRef::Struct(Default::default()),
            RecordingBackend::failing(),
            store,
        )
        .err()
        .unwrap();
        assert!(matches!(err, AppError::FeedType(_)));
    }
}
