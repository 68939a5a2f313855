use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Feed, Job, Post};
use crate::timez::parse_datetime;

use super::schema::SCHEMA;

const FEED_COLUMNS: &str = "id, link, title, version, etag, modified, urls, meta, category, \
                            active, fetched, created, updated";
const POST_COLUMNS: &str = "id, feed_id, title, url, pubdate, content, tags, signature, \
                            language, mimetype, author, summary, extra, created, updated";
const JOB_COLUMNS: &str = "id, jobid, name, version, failed, reason, started, finished, \
                           updated, counts, errors, totals";

/// SQLite store for feeds, posts and jobs.
///
/// Saves are upserts keyed on the record id. Unique constraints on
/// `feeds.link`, `posts.url`, `posts.signature` and `jobs.jobid` surface
/// as [`AppError::NotUnique`](crate::error::AppError::NotUnique).
#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed operations

    /// Inserts or replaces the feed, assigning `feed.id` on first save.
    pub async fn save_feed(&self, feed: &mut Feed) -> Result<i64> {
        feed.validate()?;
        feed.updated = Utc::now();

        let record = feed.clone();
        let urls = serde_json::to_string(&record.urls)?;
        let meta = serde_json::to_string(&record.meta)?;

        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO feeds (id, link, title, version, etag, modified, urls, meta,
                                          category, active, fetched, created, updated)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                       ON CONFLICT(id) DO UPDATE SET
                           link = excluded.link,
                           title = excluded.title,
                           version = excluded.version,
                           etag = excluded.etag,
                           modified = excluded.modified,
                           urls = excluded.urls,
                           meta = excluded.meta,
                           category = excluded.category,
                           active = excluded.active,
                           fetched = excluded.fetched,
                           updated = excluded.updated"#,
                    params![
                        record.id,
                        record.link,
                        record.title,
                        record.version,
                        record.etag,
                        record.modified,
                        urls,
                        meta,
                        record.category,
                        record.active,
                        record.fetched.map(|dt| dt.to_rfc3339()),
                        record.created.to_rfc3339(),
                        record.updated.to_rfc3339(),
                    ],
                )?;
                Ok(record.id.unwrap_or_else(|| conn.last_insert_rowid()))
            })
            .await?;

        feed.id = Some(id);
        Ok(id)
    }

    pub async fn get_feed(&self, id: i64) -> Result<Option<Feed>> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1");
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(&sql, params![id], feed_from_row)
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    pub async fn get_feed_by_link(&self, link: &str) -> Result<Option<Feed>> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE link = ?1");
        let link = link.to_string();
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(&sql, params![link], feed_from_row)
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    /// Feeds eligible for ingestion, oldest first.
    pub async fn active_feeds(&self) -> Result<Vec<Feed>> {
        self.query_feeds(format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE active = 1 ORDER BY id"
        ), None)
        .await
    }

    pub async fn feeds_by_category(&self, category: &str) -> Result<Vec<Feed>> {
        self.query_feeds(
            format!("SELECT {FEED_COLUMNS} FROM feeds WHERE category = ?1 ORDER BY id"),
            Some(category.to_string()),
        )
        .await
    }

    async fn query_feeds(&self, sql: String, arg: Option<String>) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = match arg {
                    Some(arg) => stmt.query_map(params![arg], feed_from_row)?,
                    None => stmt.query_map([], feed_from_row)?,
                };
                let feeds = rows.collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn set_feed_active(&self, id: i64, active: bool) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feeds SET active = ?1, updated = ?2 WHERE id = ?3",
                    params![active, Utc::now().to_rfc3339(), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn categories(&self) -> Result<Vec<String>> {
        let categories = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT DISTINCT category FROM feeds ORDER BY category")?;
                let categories = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(categories)
            })
            .await?;
        Ok(categories)
    }

    /// Most recently updated feed.
    pub async fn latest_feed(&self) -> Result<Option<Feed>> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY updated DESC, id DESC LIMIT 1");
        let feed = self
            .conn
            .call(move |conn| Ok(conn.query_row(&sql, [], feed_from_row).optional()?))
            .await?;
        Ok(feed)
    }

    pub async fn count_feeds(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM feeds", None).await
    }

    // Post operations

    /// Inserts or replaces the post after recomputing its signature.
    pub async fn save_post(&self, post: &mut Post) -> Result<i64> {
        post.signature = post.hash();
        post.validate()?;
        post.updated = Utc::now();

        let record = post.clone();
        let tags = serde_json::to_string(&record.tags)?;
        let extra = serde_json::to_string(&record.extra)?;

        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO posts (id, feed_id, title, url, pubdate, content, tags, signature,
                                          language, mimetype, author, summary, extra, created, updated)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                       ON CONFLICT(id) DO UPDATE SET
                           feed_id = excluded.feed_id,
                           title = excluded.title,
                           url = excluded.url,
                           pubdate = excluded.pubdate,
                           content = excluded.content,
                           tags = excluded.tags,
                           signature = excluded.signature,
                           language = excluded.language,
                           mimetype = excluded.mimetype,
                           author = excluded.author,
                           summary = excluded.summary,
                           extra = excluded.extra,
                           updated = excluded.updated"#,
                    params![
                        record.id,
                        record.feed_id,
                        record.title,
                        record.url,
                        record.pubdate.map(|dt| dt.to_rfc3339()),
                        record.content,
                        tags,
                        record.signature,
                        record.language,
                        record.mimetype,
                        record.author,
                        record.summary,
                        extra,
                        record.created.to_rfc3339(),
                        record.updated.to_rfc3339(),
                    ],
                )?;
                Ok(record.id.unwrap_or_else(|| conn.last_insert_rowid()))
            })
            .await?;

        post.id = Some(id);
        Ok(id)
    }

    pub async fn get_post(&self, id: i64) -> Result<Option<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1");
        let post = self
            .conn
            .call(move |conn| Ok(conn.query_row(&sql, params![id], post_from_row).optional()?))
            .await?;
        Ok(post)
    }

    pub async fn posts_for_feed(&self, feed_id: i64) -> Result<Vec<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE feed_id = ?1 ORDER BY id");
        let posts = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let posts = stmt
                    .query_map(params![feed_id], post_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(posts)
            })
            .await?;
        Ok(posts)
    }

    /// Posts belonging to feeds of `category`, grouped by feed.
    pub async fn posts_for_category(&self, category: &str) -> Result<Vec<Post>> {
        let columns = POST_COLUMNS
            .split(", ")
            .map(|c| format!("p.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {columns} FROM posts p JOIN feeds f ON p.feed_id = f.id \
             WHERE f.category = ?1 ORDER BY f.id, p.id"
        );
        let category = category.to_string();
        let posts = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let posts = stmt
                    .query_map(params![category], post_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(posts)
            })
            .await?;
        Ok(posts)
    }

    /// Most recently inserted post.
    pub async fn latest_post(&self) -> Result<Option<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts ORDER BY id DESC LIMIT 1");
        let post = self
            .conn
            .call(move |conn| Ok(conn.query_row(&sql, [], post_from_row).optional()?))
            .await?;
        Ok(post)
    }

    pub async fn count_posts(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM posts", None).await
    }

    pub async fn count_posts_for_feed(&self, feed_id: i64) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM posts WHERE feed_id = ?1", Some(feed_id))
            .await
    }

    // Job operations

    pub async fn save_job(&self, job: &mut Job) -> Result<i64> {
        job.updated = Utc::now();

        let record = job.clone();
        let counts = serde_json::to_string(&record.counts)?;
        let errors = serde_json::to_string(&record.errors)?;
        let totals = serde_json::to_string(&record.totals)?;

        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO jobs (id, jobid, name, version, failed, reason, started, finished,
                                         updated, counts, errors, totals)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                       ON CONFLICT(id) DO UPDATE SET
                           name = excluded.name,
                           version = excluded.version,
                           failed = excluded.failed,
                           reason = excluded.reason,
                           finished = excluded.finished,
                           updated = excluded.updated,
                           counts = excluded.counts,
                           errors = excluded.errors,
                           totals = excluded.totals"#,
                    params![
                        record.id,
                        record.jobid.to_string(),
                        record.name,
                        record.version,
                        record.failed,
                        record.reason,
                        record.started.to_rfc3339(),
                        record.finished.map(|dt| dt.to_rfc3339()),
                        record.updated.to_rfc3339(),
                        counts,
                        errors,
                        totals,
                    ],
                )?;
                Ok(record.id.unwrap_or_else(|| conn.last_insert_rowid()))
            })
            .await?;

        job.id = Some(id);
        Ok(id)
    }

    pub async fn get_job(&self, jobid: Uuid) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE jobid = ?1");
        let jobid = jobid.to_string();
        let job = self
            .conn
            .call(move |conn| Ok(conn.query_row(&sql, params![jobid], job_from_row).optional()?))
            .await?;
        Ok(job)
    }

    /// Most recently started job.
    pub async fn latest_job(&self) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY started DESC, id DESC LIMIT 1");
        let job = self
            .conn
            .call(move |conn| Ok(conn.query_row(&sql, [], job_from_row).optional()?))
            .await?;
        Ok(job)
    }

    pub async fn count_jobs(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM jobs", None).await
    }

    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &'static str) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute_batch(sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn count(&self, sql: &'static str, arg: Option<i64>) -> Result<u64> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = match arg {
                    Some(arg) => conn.query_row(sql, params![arg], |row| row.get(0))?,
                    None => conn.query_row(sql, [], |row| row.get(0))?,
                };
                Ok(count)
            })
            .await?;
        Ok(count.max(0) as u64)
    }
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn datetime_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    stored_datetime(idx, &text)
}

fn optional_datetime_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| stored_datetime(idx, &text))
        .transpose()
}

fn stored_datetime(idx: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_datetime(text).ok_or_else(|| {
        conversion_error(
            idx,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid datetime {text:?}"),
            ),
        )
    })
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        link: row.get(1)?,
        title: row.get(2)?,
        version: row.get(3)?,
        etag: row.get(4)?,
        modified: row.get(5)?,
        urls: json_column(row, 6)?,
        meta: json_column(row, 7)?,
        category: row.get(8)?,
        active: row.get(9)?,
        fetched: optional_datetime_column(row, 10)?,
        created: datetime_column(row, 11)?,
        updated: datetime_column(row, 12)?,
    })
}

fn post_from_row(row: &Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        pubdate: optional_datetime_column(row, 4)?,
        content: row.get(5)?,
        tags: json_column(row, 6)?,
        signature: row.get(7)?,
        language: row.get(8)?,
        mimetype: row.get(9)?,
        author: row.get(10)?,
        summary: row.get(11)?,
        extra: json_column(row, 12)?,
        created: datetime_column(row, 13)?,
        updated: datetime_column(row, 14)?,
    })
}

fn job_from_row(row: &Row) -> rusqlite::Result<Job> {
    let jobid: String = row.get(1)?;
    Ok(Job {
        id: row.get(0)?,
        jobid: Uuid::parse_str(&jobid).map_err(|e| conversion_error(1, e))?,
        name: row.get(2)?,
        version: row.get(3)?,
        failed: row.get(4)?,
        reason: row.get(5)?,
        started: datetime_column(row, 6)?,
        finished: optional_datetime_column(row, 7)?,
        updated: datetime_column(row, 8)?,
        counts: json_column(row, 9)?,
        errors: json_column(row, 10)?,
        totals: json_column(row, 11)?,
    })
}
