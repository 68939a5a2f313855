use std::path::Path;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::config::Config;
use crate::db::Repository;
use crate::error::Result;
use crate::export::{Exporter, SanitizeLevel};
use crate::feed::{load_opml, FeedFetcher};
use crate::ingest::{FeedSource, IngestOptions, Ingestor, JobRecorder};
use crate::models::{Counter, StoreSummary};
use crate::scheduler::Scheduler;
use crate::services::ContentFetcher;

pub struct App {
    pub config: Config,
    pub repository: Repository,
    fetcher: Arc<FeedFetcher>,
    pages: Arc<ContentFetcher>,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let repository = Repository::new(&config.db_path).await?;
        let fetcher = Arc::new(FeedFetcher::new(&config.http)?);
        let pages = Arc::new(ContentFetcher::new(&config.http)?);

        Ok(Self {
            config: config.clone(),
            repository,
            fetcher,
            pages,
        })
    }

    /// An ingestor wired to the live clients that records its runs as jobs.
    pub fn ingestor(&self, name: &str, source: FeedSource, fetch_html: bool) -> Ingestor {
        let mut options = IngestOptions::from(&self.config);
        options.fetch_html = options.fetch_html && fetch_html;

        Ingestor::new(
            name,
            self.repository.clone(),
            self.fetcher.clone(),
            self.pages.clone(),
            options,
        )
        .with_source(source)
        .with_hooks(JobRecorder::new(self.repository.clone()))
    }

    /// Runs a single ingestion and returns its one line summary.
    pub async fn ingest(&self, source: FeedSource, fetch_html: bool) -> Result<String> {
        let mut ingestor = self.ingestor("manual", source, fetch_html);
        ingestor.ingest().await?;
        Ok(ingestor.summary())
    }

    pub async fn import_opml(&self, path: &Path) -> Result<u64> {
        let rows = load_opml(&self.repository, path).await?;
        tracing::info!("Loaded {} feeds from {}", rows, path.display());
        Ok(rows)
    }

    pub async fn summary(&self) -> Result<StoreSummary> {
        let store = &self.repository;
        let latest_feed = match store.latest_feed().await? {
            Some(feed) => {
                let posts = match feed.id {
                    Some(id) => store.count_posts_for_feed(id).await?,
                    None => 0,
                };
                Some((feed, posts))
            }
            None => None,
        };

        Ok(StoreSummary {
            version: crate::VERSION.to_string(),
            feeds: store.count_feeds().await?,
            posts: store.count_posts().await?,
            jobs: store.count_jobs().await?,
            latest_feed,
            latest_post: store.latest_post().await?,
            latest_job: store.latest_job().await?,
        })
    }

    pub async fn export(
        &self,
        root: &Path,
        categories: Vec<String>,
        level: SanitizeLevel,
    ) -> Result<Counter> {
        Exporter::new(self.repository.clone())
            .categories(categories)
            .level(level)
            .export(root)
            .await
    }

    /// Ingests every active feed on the configured interval until `shutdown` fires.
    pub async fn run_service(&self, shutdown: watch::Receiver<bool>) -> Result<u64> {
        let ingestor = Arc::new(Mutex::new(self.ingestor(
            "scheduled",
            FeedSource::Active,
            true,
        )));

        Scheduler::from_minutes(self.config.ingest_interval_minutes, shutdown)
            .stop_on_error(self.config.stop_on_error)
            .run(move || {
                let ingestor = ingestor.clone();
                async move {
                    let mut ingestor = ingestor.lock().await;
                    ingestor.ingest().await
                }
            })
            .await
    }
}
