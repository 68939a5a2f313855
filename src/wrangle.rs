//! Normalizing raw feed entries into stored posts.

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::{RawContent, RawEntry};
use crate::models::Post;
use crate::services::PageFetcher;
use crate::timez::parse_datetime;

/// Generator specific entry fields that never reach a post.
pub const REMOVABLE: &[&str] = &[
    "id",
    "published_parsed",
    "expired_parsed",
    "updated",
    "updated_parsed",
    "created",
    "created_parsed",
];

/// Turns one raw entry into a [`Post`], at most once per instance.
pub struct PostWrangler {
    entry: RawEntry,
    feed_id: Option<i64>,
    store: Repository,
    post: Option<Post>,
}

impl PostWrangler {
    pub fn new(entry: &RawEntry, feed_id: Option<i64>, store: Repository) -> Self {
        Self {
            entry: entry.clone(),
            feed_id,
            store,
            post: None,
        }
    }

    /// One wrangler per entry, in feed order.
    pub fn factory(entries: &[RawEntry], feed_id: Option<i64>, store: &Repository) -> Vec<Self> {
        entries
            .iter()
            .map(|entry| Self::new(entry, feed_id, store.clone()))
            .collect()
    }

    pub fn is_wrangled(&self) -> bool {
        self.post.is_some()
    }

    pub fn post(&self) -> Option<&Post> {
        self.post.as_ref()
    }

    pub fn entry(&self) -> &RawEntry {
        &self.entry
    }

    /// Builds the post and, when `persist` is set, saves it.
    ///
    /// Later calls return the post built by the first successful call.
    pub async fn wrangle(&mut self, persist: bool) -> Result<&Post> {
        let post = match self.post.take() {
            Some(post) => post,
            None => self
                .build(persist)
                .await
                .map_err(|e| AppError::wrangling(format!("could not wrangle {}", self.label()), e))?,
        };
        Ok(self.post.insert(post))
    }

    async fn build(&self, persist: bool) -> Result<Post> {
        let entry = &self.entry;

        let url = [&entry.link, &entry.href, &entry.id]
            .into_iter()
            .flatten()
            .find(|url| !url.trim().is_empty())
            .cloned()
            .ok_or_else(|| AppError::Validation("entry has no link, href or id".to_string()))?;

        let (content, language, mimetype) = match entry.content.as_deref() {
            Some([first, rest @ ..]) => {
                let selected = select_content(first, rest);
                (
                    selected.value.clone(),
                    selected.language.clone(),
                    selected.content_type.clone(),
                )
            }
            _ => (
                entry
                    .summary
                    .clone()
                    .ok_or_else(|| AppError::Validation(format!("entry {url} has no content")))?,
                None,
                None,
            ),
        };

        let pubdate = entry.published.as_deref().and_then(|published| {
            let parsed = parse_datetime(published);
            if parsed.is_none() {
                tracing::debug!("Unparseable publication date {:?} on {}", published, url);
            }
            parsed
        });

        let mut post = Post::new(url, content);
        post.feed_id = self.feed_id;
        post.title = entry.title.clone();
        post.pubdate = pubdate;
        post.tags = entry
            .tags
            .iter()
            .flatten()
            .map(|tag| tag.term.clone())
            .collect();
        post.language = language;
        post.mimetype = mimetype;
        post.author = entry.author.clone();
        post.summary = entry.summary.clone();
        post.extra = entry
            .extra
            .iter()
            .filter(|(key, _)| !REMOVABLE.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if persist {
            self.store.save_post(&mut post).await?;
        }
        Ok(post)
    }

    /// Replaces the post content with the page at its URL.
    ///
    /// Requires a prior successful [`wrangle`](Self::wrangle). An empty body
    /// leaves the content untouched.
    pub async fn fetch(&mut self, pages: &dyn PageFetcher, persist: bool) -> Result<()> {
        let label = self.label();
        self.try_fetch(pages, persist)
            .await
            .map_err(|e| AppError::fetch(format!("could not fetch {label}"), e))
    }

    async fn try_fetch(&mut self, pages: &dyn PageFetcher, persist: bool) -> Result<()> {
        let post = self.post.as_mut().ok_or_else(|| {
            AppError::Validation("post must be wrangled before it is fetched".to_string())
        })?;

        let body = pages.fetch_page(&post.url).await?;
        if !body.trim().is_empty() {
            post.content = body;
            post.mimetype = Some("text/html".to_string());
        }

        if persist {
            self.store.save_post(post).await?;
        }
        Ok(())
    }

    fn label(&self) -> String {
        match &self.post {
            Some(post) => post.url.clone(),
            None => self
                .entry
                .link
                .clone()
                .or_else(|| self.entry.id.clone())
                .or_else(|| self.entry.title.clone())
                .unwrap_or_else(|| "entry".to_string()),
        }
    }
}

/// First item, replaced by each later `text/html` item.
fn select_content<'a>(first: &'a RawContent, rest: &'a [RawContent]) -> &'a RawContent {
    rest.iter()
        .fold(first, |selected, item| if item.is_html() { item } else { selected })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::feed::RawTag;

    struct StaticPages(Option<&'static str>);

    #[async_trait]
    impl PageFetcher for StaticPages {
        async fn fetch_page(&self, url: &str) -> Result<String> {
            self.0.map(str::to_string).ok_or_else(|| AppError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn entry(link: &str, content: Vec<RawContent>) -> RawEntry {
        RawEntry {
            id: Some(format!("{link}#id")),
            title: Some("A Post".to_string()),
            link: Some(link.to_string()),
            published: Some("2012-12-27T12:53:12-05:00".to_string()),
            content: Some(content),
            ..Default::default()
        }
    }

    async fn store() -> Repository {
        Repository::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_selects_html_content_after_first() {
        let mut plain_a = RawContent::new("text/plain", "a");
        plain_a.language = Some("fr".to_string());
        let mut html_b = RawContent::new("text/html", "b");
        html_b.language = Some("en".to_string());
        let raw = entry(
            "http://example.com/a",
            vec![plain_a, html_b, RawContent::new("text/plain", "c")],
        );

        let mut wrangler = PostWrangler::new(&raw, None, store().await);
        let post = wrangler.wrangle(false).await.unwrap();
        assert_eq!(post.content, "b");
        assert_eq!(post.language.as_deref(), Some("en"));
        assert_eq!(post.mimetype.as_deref(), Some("text/html"));
    }

    #[tokio::test]
    async fn test_keeps_first_content_without_later_html() {
        let raw = entry(
            "http://example.com/a",
            vec![
                RawContent::new("text/html", "a"),
                RawContent::new("text/plain", "b"),
            ],
        );
        let mut wrangler = PostWrangler::new(&raw, None, store().await);
        assert_eq!(wrangler.wrangle(false).await.unwrap().content, "a");
    }

    #[tokio::test]
    async fn test_falls_back_to_summary() {
        let mut raw = entry("http://example.com/a", Vec::new());
        raw.content = None;
        raw.summary = Some("<p>short</p>".to_string());

        let mut wrangler = PostWrangler::new(&raw, None, store().await);
        let post = wrangler.wrangle(false).await.unwrap();
        assert_eq!(post.content, "<p>short</p>");
        assert!(post.mimetype.is_none());
    }

    #[tokio::test]
    async fn test_normalizes_fields() {
        let mut raw = entry("", vec![RawContent::new("text/html", "<p>x</p>")]);
        raw.link = None;
        raw.href = Some("http://example.com/href".to_string());
        raw.tags = Some(vec![RawTag::new("fiction"), RawTag::new("reviews")]);
        for key in ["published_parsed", "expired_parsed", "created", "updated_parsed"] {
            raw.extra.insert(key.to_string(), Value::Null);
        }
        raw.extra
            .insert("comments".to_string(), Value::String("http://example.com/c".to_string()));

        let mut wrangler = PostWrangler::new(&raw, None, store().await);
        let post = wrangler.wrangle(false).await.unwrap();
        assert_eq!(post.url, "http://example.com/href");
        assert_eq!(post.tags, vec!["fiction", "reviews"]);
        assert_eq!(post.title.as_deref(), Some("A Post"));
        assert_eq!(post.pubdate.unwrap().to_rfc3339(), "2012-12-27T17:53:12+00:00");
        assert_eq!(post.extra.keys().collect::<Vec<_>>(), vec!["comments"]);
        assert_eq!(post.signature, post.hash());
    }

    #[tokio::test]
    async fn test_url_falls_back_to_id() {
        let mut raw = entry("http://example.com/a", vec![RawContent::new("text/html", "x")]);
        raw.link = None;
        let mut wrangler = PostWrangler::new(&raw, None, store().await);
        assert_eq!(wrangler.wrangle(false).await.unwrap().url, "http://example.com/a#id");
    }

    #[tokio::test]
    async fn test_missing_url_is_wrangling_error() {
        let raw = RawEntry {
            summary: Some("orphan".to_string()),
            ..Default::default()
        };
        let mut wrangler = PostWrangler::new(&raw, None, store().await);
        let err = wrangler.wrangle(false).await.unwrap_err();
        assert_eq!(err.classify(), "WranglingError (ValidationError)");
        assert!(!wrangler.is_wrangled());
    }

    #[tokio::test]
    async fn test_wrangle_is_idempotent() {
        let store = store().await;
        let raw = entry("http://example.com/a", vec![RawContent::new("text/html", "body")]);
        let mut wrangler = PostWrangler::new(&raw, None, store.clone());
        assert!(!wrangler.is_wrangled());

        let first = wrangler.wrangle(true).await.unwrap().clone();
        assert!(wrangler.is_wrangled());
        let second = wrangler.wrangle(true).await.unwrap().clone();

        assert_eq!(first, second);
        assert!(first.id.is_some());
        assert_eq!(store.count_posts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_content_is_classified() {
        let store = store().await;
        let a = entry("http://example.com/a", vec![RawContent::new("text/html", "same")]);
        let b = entry("http://example.com/b", vec![RawContent::new("text/html", "same")]);

        PostWrangler::new(&a, None, store.clone()).wrangle(true).await.unwrap();
        let err = PostWrangler::new(&b, None, store.clone())
            .wrangle(true)
            .await
            .unwrap_err();
        assert!(err.is_wrangling());
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_fetch_requires_wrangling() {
        let raw = entry("http://example.com/a", vec![RawContent::new("text/html", "x")]);
        let mut wrangler = PostWrangler::new(&raw, None, store().await);
        let err = wrangler
            .fetch(&StaticPages(Some("<html>full</html>")), false)
            .await
            .unwrap_err();
        assert_eq!(err.classify(), "FetchError (ValidationError)");
    }

    #[tokio::test]
    async fn test_fetch_replaces_content_and_saves() {
        let store = store().await;
        let raw = entry("http://example.com/a", vec![RawContent::new("text/html", "teaser")]);
        let mut wrangler = PostWrangler::new(&raw, None, store.clone());
        let id = wrangler.wrangle(true).await.unwrap().id.unwrap();

        wrangler
            .fetch(&StaticPages(Some("<html>full</html>")), true)
            .await
            .unwrap();

        let stored = store.get_post(id).await.unwrap().unwrap();
        assert_eq!(stored.content, "<html>full</html>");
        assert_eq!(stored.signature, crate::models::signature("<html>full</html>"));
    }

    #[tokio::test]
    async fn test_fetch_keeps_content_on_empty_body() {
        let raw = entry("http://example.com/a", vec![RawContent::new("text/html", "teaser")]);
        let mut wrangler = PostWrangler::new(&raw, None, store().await);
        wrangler.wrangle(false).await.unwrap();
        wrangler.fetch(&StaticPages(Some("  ")), false).await.unwrap();
        assert_eq!(wrangler.post().unwrap().content, "teaser");
    }

    #[tokio::test]
    async fn test_fetch_http_failure() {
        let raw = entry("http://example.com/a", vec![RawContent::new("text/html", "teaser")]);
        let mut wrangler = PostWrangler::new(&raw, None, store().await);
        wrangler.wrangle(false).await.unwrap();
        let err = wrangler.fetch(&StaticPages(None), false).await.unwrap_err();
        assert_eq!(err.classify(), "FetchError (HTTPStatusError)");
        assert!(err.is_wrangling());
    }
}
