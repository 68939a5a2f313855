use std::fmt;

use super::{Feed, Job, Post};
use crate::timez::HUMAN_DATE;

/// Store-wide status snapshot printed by `krill info`.
#[derive(Debug, Clone, Default)]
pub struct StoreSummary {
    pub version: String,
    pub feeds: u64,
    pub posts: u64,
    pub jobs: u64,
    pub latest_feed: Option<(Feed, u64)>,
    pub latest_post: Option<Post>,
    pub latest_job: Option<Job>,
}

impl fmt::Display for StoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Krill v{} Status:", self.version)?;
        writeln!(f, "  {} feeds and {} posts after {} jobs", self.feeds, self.posts, self.jobs)?;

        if let Some((feed, posts)) = &self.latest_feed {
            writeln!(f)?;
            writeln!(f, "Latest Feed:")?;
            writeln!(f, "  Title: \"{feed}\"")?;
            writeln!(f, "  eTag: \"{}\"", feed.etag.as_deref().unwrap_or(""))?;
            writeln!(f, "  Modified: {}", feed.modified.as_deref().unwrap_or(""))?;
            writeln!(f, "  Updated: {}", feed.updated.format(HUMAN_DATE))?;
            writeln!(f, "  {posts} posts")?;
        }

        if let Some(post) = &self.latest_post {
            writeln!(f)?;
            writeln!(f, "Latest Post:")?;
            writeln!(f, "  Title: \"{post}\"")?;
            writeln!(f, "  URL: {}", post.url)?;
            if let Some(pubdate) = post.pubdate {
                writeln!(f, "  Published: {}", pubdate.format(HUMAN_DATE))?;
            }
        }

        if let Some(job) = &self.latest_job {
            writeln!(f)?;
            writeln!(f, "Latest Job: {job}")?;
            writeln!(f, "  Started: {}", job.started.to_rfc3339())?;
            match job.finished {
                Some(_) if job.failed => writeln!(
                    f,
                    "  Failed after {}: {}",
                    job.humanized_duration(),
                    job.reason.as_deref().unwrap_or("")
                )?,
                Some(_) => writeln!(f, "  Finished in {} ({})", job.humanized_duration(), job.health())?,
                None => writeln!(f, "  Running for {} ({})", job.humanized_duration(), job.health())?,
            }
            for (key, value) in job.counts.iter() {
                writeln!(f, "  {key}: {value}")?;
            }
        }

        Ok(())
    }
}
