use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::{self, FeedType};
use feed_rs::parser;
use reqwest::header::{HeaderMap, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use url::Url;

use super::result::{ParseResult, RawContent, RawEntry, RawFeedMeta, RawLink, RawTag};
use crate::config::HttpConfig;
use crate::error::{AppError, Result};
use crate::models::Feed;

/// Validators sent with a feed request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Conditional {
    #[default]
    None,
    Etag(String),
    Modified(String),
}

impl Conditional {
    /// Stored etag first, then stored modified time, else unconditional.
    pub fn for_feed(feed: &Feed) -> Self {
        let present = |value: &Option<String>| value.as_ref().filter(|v| !v.is_empty()).cloned();

        if let Some(etag) = present(&feed.etag) {
            Conditional::Etag(etag)
        } else if let Some(modified) = present(&feed.modified) {
            Conditional::Modified(modified)
        } else {
            Conditional::None
        }
    }
}

/// Fetches and parses one feed document.
#[async_trait]
pub trait FeedBackend: Send + Sync {
    async fn parse(&self, url: &str, conditional: &Conditional) -> Result<ParseResult>;
}

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedBackend for FeedFetcher {
    async fn parse(&self, url: &str, conditional: &Conditional) -> Result<ParseResult> {
        let request = match conditional {
            Conditional::Etag(etag) => self.client.get(url).header(IF_NONE_MATCH, etag.as_str()),
            Conditional::Modified(modified) => {
                self.client.get(url).header(IF_MODIFIED_SINCE, modified.as_str())
            }
            Conditional::None => self.client.get(url),
        };

        let response = request.send().await?;
        let status = response.status();
        let etag = header_value(response.headers(), ETAG);
        let modified = header_value(response.headers(), LAST_MODIFIED);

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!("Feed not modified: {}", url);
            return Ok(ParseResult {
                etag,
                modified,
                ..ParseResult::not_modified()
            });
        }

        if !status.is_success() {
            return Err(AppError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let redirected = Url::parse(url).map_or(true, |requested| requested != *response.url());
        let href = redirected.then(|| response.url().to_string());

        let bytes = response.bytes().await?;
        let feed = parser::parse(&bytes[..])?;

        let mut result = convert_feed(feed);
        result.etag = etag;
        result.modified = modified;
        result.href = href;
        result.status = status.as_u16();

        tracing::debug!("Parsed {} entries from {}", result.entries.len(), url);
        Ok(result)
    }
}

fn header_value(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub fn version_tag(feed_type: &FeedType) -> &'static str {
    match feed_type {
        FeedType::Atom => "atom10",
        FeedType::RSS2 => "rss20",
        FeedType::RSS1 => "rss10",
        FeedType::RSS0 => "rss090",
        FeedType::JSON => "json1",
    }
}

/// Preferred page link: the first `alternate` (or untyped) link, else the first link.
fn alternate_link(links: &[model::Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}

/// Maps a parsed feed-rs document onto the raw result shape.
pub fn convert_feed(feed: model::Feed) -> ParseResult {
    let mut extra = BTreeMap::new();
    if !feed.id.is_empty() {
        extra.insert("id".to_string(), Value::String(feed.id.clone()));
    }
    if let Some(updated) = feed.updated {
        extra.insert("updated".to_string(), Value::String(updated.to_rfc3339()));
    }
    if let Some(published) = feed.published {
        extra.insert("published".to_string(), Value::String(published.to_rfc3339()));
    }
    if let Some(description) = &feed.description {
        extra.insert("subtitle".to_string(), Value::String(description.content.clone()));
    }
    if let Some(language) = &feed.language {
        extra.insert("language".to_string(), Value::String(language.clone()));
    }
    if let Some(generator) = &feed.generator {
        extra.insert("generator".to_string(), Value::String(generator.content.clone()));
    }
    if let Some(rights) = &feed.rights {
        extra.insert("rights".to_string(), Value::String(rights.content.clone()));
    }
    if let Some(category) = feed.categories.first() {
        extra.insert("category".to_string(), Value::String(category.term.clone()));
    }

    let meta = RawFeedMeta {
        title: feed.title.as_ref().map(|t| t.content.clone()),
        link: alternate_link(&feed.links),
        links: feed
            .links
            .iter()
            .map(|l| RawLink {
                rel: l.rel.clone(),
                href: l.href.clone(),
            })
            .collect(),
        extra,
    };

    ParseResult {
        version: Some(version_tag(&feed.feed_type).to_string()),
        entries: feed.entries.into_iter().map(convert_entry).collect(),
        feed: meta,
        ..Default::default()
    }
}

fn convert_entry(entry: model::Entry) -> RawEntry {
    let content = entry.content.as_ref().and_then(|c| {
        c.body.as_ref().map(|body| {
            vec![RawContent {
                content_type: Some(c.content_type.essence().to_string()),
                value: body.clone(),
                language: entry.language.clone(),
            }]
        })
    });

    let tags = (!entry.categories.is_empty()).then(|| {
        entry
            .categories
            .iter()
            .map(|c| RawTag {
                term: c.term.clone(),
                scheme: c.scheme.clone(),
                label: c.label.clone(),
            })
            .collect()
    });

    let mut extra = BTreeMap::new();
    if let Some(rights) = &entry.rights {
        extra.insert("rights".to_string(), Value::String(rights.content.clone()));
    }
    if entry.authors.len() > 1 {
        let authors = entry
            .authors
            .iter()
            .map(|a| Value::String(a.name.clone()))
            .collect();
        extra.insert("authors".to_string(), Value::Array(authors));
    }

    RawEntry {
        id: (!entry.id.is_empty()).then(|| entry.id.clone()),
        title: entry.title.as_ref().map(|t| t.content.clone()),
        link: alternate_link(&entry.links),
        href: entry
            .content
            .as_ref()
            .and_then(|c| c.src.as_ref())
            .map(|l| l.href.clone()),
        published: entry.published.map(|dt| dt.to_rfc3339()),
        updated: entry.updated.map(|dt| dt.to_rfc3339()),
        author: entry.authors.first().map(|a| a.name.clone()),
        summary: entry.summary.as_ref().map(|s| s.content.clone()),
        content,
        tags,
        extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Book Reviews</title>
    <link>http://books.example.com/</link>
    <description>Reviews of new books</description>
    <language>en-us</language>
    <item>
      <title>A Long Read</title>
      <link>http://books.example.com/long-read</link>
      <guid>http://books.example.com/?p=1</guid>
      <description>&lt;p&gt;Worth it.&lt;/p&gt;</description>
      <category>fiction</category>
      <category>reviews</category>
      <pubDate>Mon, 02 Mar 2015 09:00:00 -0500</pubDate>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Kitchen Notes</title>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <updated>2015-03-02T14:00:00Z</updated>
  <link rel="alternate" href="http://food.example.com/"/>
  <link rel="self" href="http://food.example.com/atom.xml"/>
  <entry>
    <title>Braised Greens</title>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <link rel="alternate" href="http://food.example.com/greens"/>
    <updated>2015-03-02T14:00:00Z</updated>
    <published>2015-03-01T10:00:00Z</published>
    <author><name>Cook</name></author>
    <summary>Greens, slowly.</summary>
    <content type="html">&lt;p&gt;Braise them.&lt;/p&gt;</content>
  </entry>
</feed>"#;

    fn parse(xml: &str) -> ParseResult {
        convert_feed(parser::parse(xml.as_bytes()).unwrap())
    }

    #[test]
    fn test_convert_rss() {
        let result = parse(RSS);
        assert_eq!(result.version.as_deref(), Some("rss20"));
        assert_eq!(result.feed.title.as_deref(), Some("Book Reviews"));
        assert_eq!(result.feed.link.as_deref(), Some("http://books.example.com/"));
        assert_eq!(
            result.feed.extra.get("language"),
            Some(&Value::String("en-us".to_string()))
        );

        assert_eq!(result.entries.len(), 1);
        let entry = &result.entries[0];
        assert_eq!(entry.title.as_deref(), Some("A Long Read"));
        assert_eq!(entry.link.as_deref(), Some("http://books.example.com/long-read"));
        assert!(entry.summary.as_deref().unwrap().contains("Worth it."));
        let terms: Vec<&str> = entry
            .tags
            .as_ref()
            .unwrap()
            .iter()
            .map(|t| t.term.as_str())
            .collect();
        assert_eq!(terms, vec!["fiction", "reviews"]);
        assert_eq!(entry.published.as_deref(), Some("2015-03-02T14:00:00+00:00"));
    }

    #[test]
    fn test_convert_atom() {
        let result = parse(ATOM);
        assert_eq!(result.version.as_deref(), Some("atom10"));
        assert_eq!(result.feed.link.as_deref(), Some("http://food.example.com/"));
        assert_eq!(result.feed.links.len(), 2);
        assert!(result.feed.extra.contains_key("updated"));

        let entry = &result.entries[0];
        assert_eq!(entry.link.as_deref(), Some("http://food.example.com/greens"));
        assert_eq!(entry.author.as_deref(), Some("Cook"));
        let content = entry.content.as_ref().unwrap();
        assert_eq!(content.len(), 1);
        assert!(content[0].is_html());
        assert!(content[0].value.contains("Braise them."));
    }

    #[test]
    fn test_conditional_prefers_etag() {
        let mut feed = Feed::new("http://example.com/rss", "books");
        assert_eq!(Conditional::for_feed(&feed), Conditional::None);

        feed.modified = Some("Mon, 02 Mar 2015 14:00:00 GMT".to_string());
        assert_eq!(
            Conditional::for_feed(&feed),
            Conditional::Modified("Mon, 02 Mar 2015 14:00:00 GMT".to_string())
        );

        feed.etag = Some("\"abc\"".to_string());
        assert_eq!(
            Conditional::for_feed(&feed),
            Conditional::Etag("\"abc\"".to_string())
        );
    }

    #[test]
    fn test_conditional_ignores_empty_tokens() {
        let mut feed = Feed::new("http://example.com/rss", "books");
        feed.etag = Some(String::new());
        feed.modified = Some("Mon, 02 Mar 2015 14:00:00 GMT".to_string());
        assert!(matches!(Conditional::for_feed(&feed), Conditional::Modified(_)));
    }

    #[test]
    fn test_client_builds_from_config() {
        assert!(FeedFetcher::new(&HttpConfig::default()).is_ok());
    }
}
