//! Cooperative cancellation of running jobs.
//!
//! The registry tracks every active job. A cancel request marks an active job;
//! the job observes the mark at its next poll point. Entries are removed when
//! the job's [`ActiveJob`] guard is dropped, so a job that ends on any path
//! never leaves a stale entry behind.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::JobId;

/// Process-wide set of active jobs and their cancellation marks.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    /// Active job -> marked for cancellation.
    active: DashMap<JobId, bool>,
    /// Process shutdown; observed by every job as a cancellation.
    shutdown: CancellationToken,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose jobs also observe `shutdown` as a cancellation.
    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self {
            active: DashMap::new(),
            shutdown,
        }
    }

    /// Register an active job. The returned guard clears the entry on drop.
    pub fn register(self: &Arc<Self>, id: JobId) -> ActiveJob {
        self.active.insert(id.clone(), false);
        debug!(job_id = %id, "Job registered");
        ActiveJob {
            handle: JobCancellation {
                id,
                registry: Arc::clone(self),
            },
        }
    }

    /// Mark a job for cancellation.
    ///
    /// Returns `false` when no such job is active.
    pub fn mark(&self, id: &JobId) -> bool {
        match self.active.get_mut(id) {
            Some(mut marked) => {
                *marked = true;
                debug!(job_id = %id, "Job marked for cancellation");
                true
            }
            None => false,
        }
    }

    /// Whether the job has been marked (or the process is shutting down).
    pub fn is_cancelled(&self, id: &JobId) -> bool {
        self.shutdown.is_cancelled() || self.active.get(id).is_some_and(|marked| *marked)
    }

    /// Remove a job from the registry.
    pub fn clear(&self, id: &JobId) {
        self.active.remove(id);
    }

    pub fn is_active(&self, id: &JobId) -> bool {
        self.active.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Cheap, cloneable view of one job's cancellation state.
#[derive(Debug, Clone)]
pub struct JobCancellation {
    id: JobId,
    registry: Arc<CancellationRegistry>,
}

impl JobCancellation {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.registry.is_cancelled(&self.id)
    }
}

/// Registration guard for a running job.
#[derive(Debug)]
pub struct ActiveJob {
    handle: JobCancellation,
}

impl ActiveJob {
    pub fn id(&self) -> &JobId {
        &self.handle.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// A handle to pass to the collaborators of this job.
    pub fn cancellation(&self) -> JobCancellation {
        self.handle.clone()
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.handle.registry.clear(&self.handle.id);
    }
}
