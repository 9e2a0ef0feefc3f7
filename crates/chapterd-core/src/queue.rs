//! Download queue: the enqueue/list/admin surface over the `jobs` table.
//!
//! Manual requests go through here; the chapter checker inserts follow-driven
//! jobs directly with its own duplicate rule. Status transitions after enqueue
//! belong to the engine, except the administrative `mark_status` and `clear`.

use crate::config::ChapterdConfig;
use crate::remote::title_id_from_url;
use crate::store::{
    FollowEntry, Job, JobFilter, JobId, JobOrigin, JobStatus, NewFollow, NewJob, QueueError,
    StateDb,
};

/// Priority of manual requests unless given; follow-driven jobs use a larger number.
pub const DEFAULT_PRIORITY: i64 = 5;

/// A manual enqueue; unset fields fall back to the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct EnqueueRequest {
    pub source_url: String,
    pub title: Option<String>,
    pub library: Option<String>,
    pub language: Option<String>,
    pub priority: Option<i64>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct DownloadQueue {
    db: StateDb,
    language: String,
    max_retries: u32,
}

impl DownloadQueue {
    pub fn new(db: StateDb, cfg: &ChapterdConfig) -> Self {
        Self {
            db,
            language: cfg.language.clone(),
            max_retries: cfg.max_retries,
        }
    }

    pub async fn enqueue(&self, req: &EnqueueRequest) -> Result<Job, QueueError> {
        let title = match req.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => title_from_url(&req.source_url).ok_or_else(|| {
                QueueError::Invalid(format!(
                    "cannot derive a title from {:?}; pass one explicitly",
                    req.source_url
                ))
            })?,
        };
        let job = NewJob {
            source_url: req.source_url.trim().to_string(),
            title,
            library: req.library.clone().unwrap_or_default(),
            language: req
                .language
                .clone()
                .unwrap_or_else(|| self.language.clone())
                .to_lowercase(),
            priority: req.priority.unwrap_or(DEFAULT_PRIORITY),
            max_retries: req.max_retries.unwrap_or(self.max_retries),
            origin: JobOrigin::Manual,
        };
        let job = self.db.insert_job(&job).await?;
        tracing::info!(job_id = job.id, title = %job.title, priority = job.priority, "job queued");
        Ok(job)
    }

    pub async fn dequeue_next_pending(&self) -> Result<Option<Job>, QueueError> {
        self.db.dequeue_next_pending().await
    }

    pub async fn get(&self, id: JobId) -> Result<Job, QueueError> {
        self.db.get_job(id).await?.ok_or(QueueError::NotFound(id))
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, QueueError> {
        self.db.list_jobs(filter).await
    }

    /// Administrative status change, validated against the job state machine.
    pub async fn mark_status(&self, id: JobId, status: JobStatus) -> Result<Job, QueueError> {
        self.db.set_status(id, status).await
    }

    pub async fn clear_by_status(&self, status: JobStatus) -> Result<u64, QueueError> {
        let n = self.db.clear_by_status(status).await?;
        tracing::info!(%status, removed = n, "cleared jobs");
        Ok(n)
    }

    pub async fn remove(&self, id: JobId) -> Result<bool, QueueError> {
        self.db.remove_job(id).await
    }

    /// Follows a title; title and language default like `enqueue`.
    pub async fn follow(
        &self,
        source_url: &str,
        title: Option<&str>,
        library: Option<&str>,
        language: Option<&str>,
    ) -> Result<FollowEntry, QueueError> {
        let title = match title.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => title_from_url(source_url).ok_or_else(|| {
                QueueError::Invalid(format!("cannot derive a title from {source_url:?}"))
            })?,
        };
        self.db
            .add_follow(&NewFollow {
                source_url: source_url.trim().to_string(),
                title,
                language: language.unwrap_or(&self.language).to_lowercase(),
                library: library.unwrap_or_default().to_string(),
            })
            .await
    }

    pub async fn unfollow(&self, source_url: &str) -> Result<bool, QueueError> {
        self.db.remove_follow(source_url.trim()).await
    }

    pub async fn follows(&self) -> Result<Vec<FollowEntry>, QueueError> {
        self.db.list_follows().await
    }
}

/// Title from a `.../title/<id>/<slug>` URL: the slug in title case, else the id.
pub fn title_from_url(source_url: &str) -> Option<String> {
    let id = title_id_from_url(source_url).ok()?;
    let slug = url::Url::parse(source_url).ok().and_then(|u| {
        let mut segments = u.path_segments()?;
        segments.find(|s| *s == "title")?;
        segments.nth(1).filter(|s| !s.is_empty()).map(str::to_string)
    });
    let Some(slug) = slug else {
        return Some(id);
    };
    let words: Vec<String> = slug
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    if words.is_empty() {
        Some(id)
    } else {
        Some(words.join(" "))
    }
}
