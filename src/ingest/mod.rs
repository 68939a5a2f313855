//! Ingestion runs: synchronize every feed, wrangle every entry, tally the outcome.

mod hooks;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{self, StreamExt};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::{parse_opml_file, FeedBackend, FeedRef, FeedSync};
use crate::logging::current_user;
use crate::models::Counter;
use crate::services::PageFetcher;
use crate::timez::Timer;
use crate::wrangle::PostWrangler;

pub use hooks::{IngestHooks, JobRecorder, NullHooks, RunReport};

/// Every counter a run reports, present even when zero.
pub const COUNTERS: &[&str] = &[
    "feeds",
    "unchanged_feeds",
    "feed_error",
    "posts",
    "errors",
    "duplicate_posts",
    "fetch_error",
];

/// Where a run gets its feeds from.
#[derive(Debug, Clone)]
pub enum FeedSource {
    Refs(Vec<FeedRef>),
    Opml(PathBuf),
    /// Every active feed in the store.
    Active,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub fetch_html: bool,
    pub workers: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            fetch_html: true,
            workers: 1,
        }
    }
}

impl From<&Config> for IngestOptions {
    fn from(config: &Config) -> Self {
        Self {
            fetch_html: config.fetch_html,
            workers: config.workers,
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    counts: Counter,
    errors: Counter,
}

impl Tally {
    fn new() -> Self {
        Self {
            counts: Counter::with_keys(COUNTERS),
            errors: Counter::new(),
        }
    }
}

pub struct Ingestor {
    name: String,
    source: Option<FeedSource>,
    store: Repository,
    backend: Arc<dyn FeedBackend>,
    pages: Arc<dyn PageFetcher>,
    options: IngestOptions,
    hooks: Box<dyn IngestHooks>,
    jobid: Option<Uuid>,
    tally: Mutex<Tally>,
    timer: Option<Timer>,
}

impl Ingestor {
    pub fn new(
        name: impl Into<String>,
        store: Repository,
        backend: Arc<dyn FeedBackend>,
        pages: Arc<dyn PageFetcher>,
        options: IngestOptions,
    ) -> Self {
        Self {
            name: name.into(),
            source: None,
            store,
            backend,
            pages,
            options,
            hooks: Box::new(NullHooks),
            jobid: None,
            tally: Mutex::new(Tally::new()),
            timer: None,
        }
    }

    pub fn with_source(mut self, source: FeedSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_hooks(mut self, hooks: impl IngestHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the current or most recent run.
    pub fn jobid(&self) -> Option<Uuid> {
        self.jobid
    }

    pub fn timer(&self) -> Option<&Timer> {
        self.timer.as_ref()
    }

    pub fn counts(&self) -> Counter {
        self.lock().counts.clone()
    }

    pub fn errors(&self) -> Counter {
        self.lock().errors.clone()
    }

    /// One line description of the last run.
    pub fn summary(&self) -> String {
        let tally = self.lock();
        let timer = self
            .timer
            .map(|timer| timer.to_string())
            .unwrap_or_else(|| "not run".to_string());
        format!(
            "Processed {} feeds ({}): {} posts with {} errors",
            tally.counts.get("feeds"),
            timer,
            tally.counts.get("posts"),
            tally.counts.get("errors")
        )
    }

    /// Runs one ingestion job from start to finish.
    ///
    /// Feed and post failures are tallied and never stop the run. Any other
    /// failure fires the `failed` hook and is returned.
    pub async fn ingest(&mut self) -> Result<()> {
        let jobid = Uuid::new_v4();
        let span = tracing::info_span!("ingest", user = %current_user(), job = %jobid);
        self.run(jobid).instrument(span).await
    }

    async fn run(&mut self, jobid: Uuid) -> Result<()> {
        self.jobid = Some(jobid);
        self.timer = None;
        *self.lock() = Tally::new();

        tracing::info!("Starting {} ingestion job {}", self.name, jobid);
        let report = self.report();
        self.hooks.started(&report).await?;

        let mut timer = Timer::start();
        let result = self.process().await;
        timer.stop();
        self.timer = Some(timer);

        let report = self.report();
        match result {
            Ok(()) => {
                tracing::info!("{}", self.summary());
                self.hooks.finished(&report).await
            }
            Err(e) => {
                tracing::error!("Ingestion job {} failed: {}", jobid, e);
                if let Err(hook_error) = self.hooks.failed(&report, &e).await {
                    tracing::error!("Could not record failure of job {}: {}", jobid, hook_error);
                }
                Err(e)
            }
        }
    }

    fn report(&self) -> RunReport {
        let tally = self.lock();
        RunReport {
            jobid: self.jobid.unwrap_or_else(Uuid::nil),
            name: self.name.clone(),
            counts: tally.counts.clone(),
            errors: tally.errors.clone(),
            timer: self.timer,
        }
    }

    /// Resolves the configured source into feed references.
    pub async fn feeds(&self) -> Result<Vec<FeedRef>> {
        match &self.source {
            None => Err(AppError::Ingestion(format!(
                "No feeds specified for {} ingestion!",
                self.name
            ))),
            Some(FeedSource::Refs(refs)) => Ok(refs.clone()),
            Some(FeedSource::Opml(path)) => Ok(parse_opml_file(path)?
                .into_iter()
                .map(FeedRef::Struct)
                .collect()),
            Some(FeedSource::Active) => Ok(self
                .store
                .active_feeds()
                .await?
                .into_iter()
                .map(FeedRef::Model)
                .collect()),
        }
    }

    /// Processes every feed, up to `workers` at a time.
    pub async fn process(&self) -> Result<()> {
        let feeds = self.feeds().await?;
        tracing::info!("Processing {} feeds with {} workers", feeds.len(), self.options.workers);

        stream::iter(feeds)
            .map(|feed| self.dispatch(feed))
            .buffer_unordered(self.options.workers.max(1))
            .collect::<Vec<()>>()
            .await;

        Ok(())
    }

    async fn dispatch(&self, feed: FeedRef) {
        match FeedSync::new(feed, self.backend.clone(), self.store.clone()) {
            Ok(mut sync) => self.process_feed(&mut sync).await,
            Err(e) => {
                tracing::warn!("Skipping feed: {}", e);
                self.record_error("feed_error", &e);
            }
        }
    }

    /// Synchronizes one feed and wrangles its entries in order.
    pub async fn process_feed(&self, sync: &mut FeedSync) {
        let result = match sync.sync(true).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("{}", e);
                self.record_error("feed_error", &e);
                return;
            }
        };

        self.incr("feeds");
        if result.is_unchanged() {
            tracing::debug!("{} is unchanged", sync.feed());
            self.incr("unchanged_feeds");
            return;
        }

        let feed_id = sync.feed_id();
        for mut wrangler in PostWrangler::factory(&result.entries, feed_id, &self.store) {
            if let Err(e) = self.process_post(&mut wrangler).await {
                tracing::debug!("Continuing {} after post failure: {}", sync.feed(), e);
            }
        }
    }

    /// Wrangles one entry and, when enabled, fetches its full page.
    ///
    /// Duplicates are counted and absorbed. Other wrangling failures are
    /// counted and returned.
    pub async fn process_post(&self, wrangler: &mut PostWrangler) -> Result<()> {
        match wrangler.wrangle(true).await {
            Ok(post) => {
                tracing::debug!("Wrangled {}", post.url);
                self.incr("posts");
            }
            Err(e) if e.is_duplicate() => {
                tracing::debug!("Duplicate post: {}", e);
                self.incr("duplicate_posts");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("{}", e);
                self.record_error("errors", &e);
                return Err(e);
            }
        }

        if self.options.fetch_html {
            if let Err(e) = wrangler.fetch(self.pages.as_ref(), true).await {
                tracing::warn!("{}", e);
                self.record_error("fetch_error", &e);
            }
        }

        Ok(())
    }

    fn incr(&self, key: &str) {
        self.lock().counts.incr(key);
    }

    fn record_error(&self, key: &str, error: &AppError) {
        let mut tally = self.lock();
        tally.counts.incr(key);
        tally.errors.incr(&error.classify());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tally> {
        self.tally.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
