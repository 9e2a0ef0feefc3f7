//! In-memory registry of jobs the engine is currently executing.
//!
//! Empty at startup, drained on shutdown. Each entry carries the cooperative
//! cancellation flag the worker checks between chapters; the subprocess itself
//! is owned by the process runner under the same job id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::store::JobId;

#[derive(Debug)]
struct ActiveJob {
    title: String,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
pub struct ActiveJobs {
    jobs: RwLock<HashMap<JobId, ActiveJob>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job and returns its cancellation flag, or `None` if the job
    /// is already active (a job is never started twice).
    pub fn register(&self, job_id: JobId, title: &str) -> Option<Arc<AtomicBool>> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job_id) {
            return None;
        }
        let cancel = Arc::new(AtomicBool::new(false));
        jobs.insert(
            job_id,
            ActiveJob {
                title: title.to_string(),
                cancel: Arc::clone(&cancel),
            },
        );
        Some(cancel)
    }

    pub fn unregister(&self, job_id: JobId) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
    }

    /// Sets the job's cancellation flag. Returns false if the job is not active.
    pub fn request_cancel(&self, job_id: JobId) -> bool {
        match self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
        {
            Some(job) => {
                job.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&job_id)
    }

    pub fn is_empty(&self) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Active jobs as (id, title), ordered by id.
    pub fn snapshot(&self) -> Vec<(JobId, String)> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = jobs.iter().map(|(id, j)| (*id, j.title.clone())).collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Flags every job for cancellation and empties the registry. Returns the drained ids.
    pub fn drain(&self) -> Vec<JobId> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let mut ids = Vec::with_capacity(jobs.len());
        for (id, job) in jobs.drain() {
            job.cancel.store(true, Ordering::SeqCst);
            ids.push(id);
        }
        ids.sort_unstable();
        ids
    }
}
