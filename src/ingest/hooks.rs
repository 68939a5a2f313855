use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{Counter, Job};
use crate::timez::Timer;

/// Snapshot of a run handed to the lifecycle hooks.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub jobid: Uuid,
    pub name: String,
    pub counts: Counter,
    pub errors: Counter,
    pub timer: Option<Timer>,
}

/// Lifecycle callbacks around [`Ingestor::ingest`](super::Ingestor::ingest).
///
/// `started` fires once per run, followed by exactly one of `failed` or
/// `finished` after every feed has been processed.
#[async_trait]
pub trait IngestHooks: Send + Sync {
    async fn started(&mut self, _run: &RunReport) -> Result<()> {
        Ok(())
    }

    async fn failed(&mut self, _run: &RunReport, _error: &AppError) -> Result<()> {
        Ok(())
    }

    async fn finished(&mut self, _run: &RunReport) -> Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing beyond the ingestor's own logging.
pub struct NullHooks;

impl IngestHooks for NullHooks {}

/// Records each run as a [`Job`] in the store.
pub struct JobRecorder {
    store: Repository,
    job: Option<Job>,
}

impl JobRecorder {
    pub fn new(store: Repository) -> Self {
        Self { store, job: None }
    }

    /// The job of the current or most recent run.
    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    fn current(&mut self, run: &RunReport) -> Result<&mut Job> {
        match self.job.as_mut() {
            Some(job) if job.jobid == run.jobid => Ok(job),
            _ => Err(AppError::Ingestion(format!(
                "job {} was never started",
                run.jobid
            ))),
        }
    }
}

#[async_trait]
impl IngestHooks for JobRecorder {
    async fn started(&mut self, run: &RunReport) -> Result<()> {
        let mut job = Job::new(run.jobid, run.name.clone());
        self.store.save_job(&mut job).await?;
        self.job = Some(job);
        Ok(())
    }

    async fn failed(&mut self, run: &RunReport, error: &AppError) -> Result<()> {
        let store = self.store.clone();
        let job = self.current(run)?;
        job.failed = true;
        job.reason = Some(error.to_string());
        job.finished = Some(Utc::now());
        job.counts = run.counts.clone();
        job.errors = run.errors.clone();
        store.save_job(job).await?;
        Ok(())
    }

    async fn finished(&mut self, run: &RunReport) -> Result<()> {
        let store = self.store.clone();

        let totals = match totals(&store).await {
            Ok(totals) => totals,
            Err(e) => return self.abandon(run, e).await,
        };

        let job = self.current(run)?;
        job.reason = Some("OK".to_string());
        job.finished = Some(Utc::now());
        job.counts = run.counts.clone();
        job.errors = run.errors.clone();
        job.totals = totals;
        if let Err(e) = store.save_job(job).await {
            return self.abandon(run, e).await;
        }
        Ok(())
    }
}

impl JobRecorder {
    /// Closes the job as failed when finishing it went wrong, then returns `error`.
    async fn abandon(&mut self, run: &RunReport, error: AppError) -> Result<()> {
        tracing::error!("Could not finish job {}: {}", run.jobid, error);
        if let Err(e) = self.failed(run, &error).await {
            tracing::error!("Could not record failure of job {}: {}", run.jobid, e);
        }
        Err(error)
    }
}

async fn totals(store: &Repository) -> Result<Counter> {
    let mut totals = Counter::new();
    totals.set("feeds", store.count_feeds().await?);
    totals.set("posts", store.count_posts().await?);
    totals.set("jobs", store.count_jobs().await?);
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(jobid: Uuid) -> RunReport {
        let mut counts = Counter::with_keys(&["feeds", "posts"]);
        counts.add("posts", 4);
        RunReport {
            jobid,
            name: "test".to_string(),
            counts,
            errors: Counter::new(),
            timer: None,
        }
    }

    #[tokio::test]
    async fn test_records_finished_job() {
        let store = Repository::open_in_memory().await.unwrap();
        let mut recorder = JobRecorder::new(store.clone());
        let run = report(Uuid::new_v4());

        recorder.started(&run).await.unwrap();
        let running = store.get_job(run.jobid).await.unwrap().unwrap();
        assert!(running.finished.is_none());

        recorder.finished(&run).await.unwrap();
        let job = store.get_job(run.jobid).await.unwrap().unwrap();
        assert_eq!(job.reason.as_deref(), Some("OK"));
        assert!(!job.failed);
        assert!(job.finished.is_some());
        assert_eq!(job.counts.get("posts"), 4);
        assert_eq!(job.totals.get("jobs"), 1);
        assert_eq!(job.totals.get("feeds"), 0);
        assert_eq!(store.count_jobs().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_records_failed_job() {
        let store = Repository::open_in_memory().await.unwrap();
        let mut recorder = JobRecorder::new(store.clone());
        let run = report(Uuid::new_v4());

        recorder.started(&run).await.unwrap();
        let error = AppError::Ingestion("No feeds specified for test ingestion!".to_string());
        recorder.failed(&run, &error).await.unwrap();

        let job = store.get_job(run.jobid).await.unwrap().unwrap();
        assert!(job.failed);
        assert_eq!(
            job.reason.as_deref(),
            Some("Ingestion error: No feeds specified for test ingestion!")
        );
        assert!(job.finished.is_some());
    }

    #[tokio::test]
    async fn test_broken_finish_marks_the_job_failed() {
        let store = Repository::open_in_memory().await.unwrap();
        let mut recorder = JobRecorder::new(store.clone());
        let run = report(Uuid::new_v4());

        recorder.started(&run).await.unwrap();
        store.execute_batch("DROP TABLE posts").await.unwrap();
        let err = recorder.finished(&run).await.unwrap_err();

        let job = store.get_job(run.jobid).await.unwrap().unwrap();
        assert!(job.failed);
        assert!(job.finished.is_some());
        assert_eq!(job.reason, Some(err.to_string()));
        assert_eq!(job.counts.get("posts"), 4);
        assert!(job.totals.is_empty());
    }

    #[tokio::test]
    async fn test_finish_without_start_is_an_error() {
        let store = Repository::open_in_memory().await.unwrap();
        let mut recorder = JobRecorder::new(store);
        let err = recorder.finished(&report(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, AppError::Ingestion(_)));
    }
}
