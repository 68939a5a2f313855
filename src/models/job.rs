use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Counter;
use crate::timez::humanizedelta;

/// Audit record of one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Option<i64>,
    pub jobid: Uuid,
    pub name: String,
    pub version: String,
    pub failed: bool,
    pub reason: Option<String>,
    pub started: DateTime<Utc>,
    /// Unset while the run is in progress.
    pub finished: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
    pub counts: Counter,
    pub errors: Counter,
    pub totals: Counter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobHealth {
    Success,
    Warning,
    Danger,
}

impl Job {
    pub fn new(jobid: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            jobid,
            name: name.into(),
            version: crate::VERSION.to_string(),
            failed: false,
            reason: None,
            started: now,
            finished: None,
            updated: now,
            counts: Counter::new(),
            errors: Counter::new(),
            totals: Counter::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.finished.is_none()
    }

    pub fn duration(&self) -> Duration {
        self.finished.unwrap_or_else(Utc::now) - self.started
    }

    pub fn humanized_duration(&self) -> String {
        humanizedelta(self.duration().to_std().unwrap_or_default())
    }

    /// Status colour of the run, judged by outcome and how long it has taken.
    pub fn health(&self) -> JobHealth {
        let duration = self.duration();
        match self.finished {
            Some(_) if self.failed => JobHealth::Danger,
            Some(_) if duration > Duration::minutes(30) => JobHealth::Warning,
            Some(_) => JobHealth::Success,
            None if duration < Duration::minutes(30) => JobHealth::Success,
            None if duration < Duration::hours(2) => JobHealth::Warning,
            None => JobHealth::Danger,
        }
    }
}

impl fmt::Display for JobHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobHealth::Success => "success",
            JobHealth::Warning => "warning",
            JobHealth::Danger => "danger",
        };
        f.write_str(label)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Job {}", self.name, self.jobid)
    }
}
