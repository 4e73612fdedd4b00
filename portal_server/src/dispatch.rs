//! Asynchronous execution of synchronization work off the request path.
//!
//! Enqueue is fire-and-forget from the caller's perspective; the assigned
//! job id is logged and returned so a running job stays observable. Jobs
//! carry at-least-once semantics: every step they drive is idempotent, so a
//! transfer failure can be replayed whole.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use object_sync::SyncError;
use parking_lot::Mutex;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::{error, info};
use ulid::Ulid;

pub type JobId = Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed { error: String },
}

/// How many terminal job statuses stay queryable before the oldest are
/// evicted. Keeps the status table from growing without bound.
const MAX_FINISHED_JOBS: usize = 256;

#[derive(Debug, Default)]
struct JobTable {
    statuses: HashMap<JobId, JobStatus>,
    /// Terminal job ids in completion order, oldest first.
    finished: VecDeque<JobId>,
}

impl JobTable {
    fn record_terminal(&mut self, id: JobId, status: JobStatus, max_finished: usize) {
        self.statuses.insert(id, status);
        self.finished.push_back(id);
        while self.finished.len() > max_finished {
            if let Some(evicted) = self.finished.pop_front() {
                self.statuses.remove(&evicted);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobDispatcher {
    jobs: Arc<Mutex<JobTable>>,
    retry_interval: Duration,
    max_attempts: usize,
    job_timeout: Duration,
    max_finished: usize,
}

impl Default for JobDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl JobDispatcher {
    /// Day-scale timeout: a stuck job is eventually treated as failed and
    /// becomes eligible for an operator-triggered retry instead of being
    /// silently abandoned.
    pub fn new() -> Self {
        Self::with_policy(Duration::from_secs(30), 3, Duration::from_secs(24 * 60 * 60))
    }

    pub fn with_policy(retry_interval: Duration, max_attempts: usize, job_timeout: Duration) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(JobTable::default())),
            retry_interval,
            max_attempts: max_attempts.max(1),
            job_timeout,
            max_finished: MAX_FINISHED_JOBS,
        }
    }

    /// Spawns `job` in the background and returns its id immediately.
    ///
    /// Transient transfer failures are replayed up to the attempt limit;
    /// terminal errors (integrity mismatches) are not. An uncaught failure
    /// is captured into the job status with its entity context, never
    /// propagated to any HTTP caller.
    pub fn submit<F, Fut>(&self, label: &'static str, entity: &str, job: F) -> JobId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = object_sync::Result<()>> + Send + 'static,
    {
        let id = Ulid::new();
        info!(job_id = %id, label, entity, "job enqueued");
        self.jobs.lock().statuses.insert(id, JobStatus::Running);

        let jobs = self.jobs.clone();
        let entity = entity.to_string();
        let strategy = FixedInterval::new(self.retry_interval).take(self.max_attempts - 1);
        let job_timeout = self.job_timeout;
        let max_finished = self.max_finished;

        tokio::spawn(async move {
            let attempts = RetryIf::spawn(strategy, job, |e: &SyncError| e.is_retryable());
            let status = match tokio::time::timeout(job_timeout, attempts).await {
                Ok(Ok(())) => {
                    info!(job_id = %id, label, entity, "job succeeded");
                    JobStatus::Succeeded
                },
                Ok(Err(e)) => {
                    error!(job_id = %id, label, entity, error = %e, "job failed");
                    JobStatus::Failed { error: e.to_string() }
                },
                Err(_) => {
                    error!(job_id = %id, label, entity, timeout = ?job_timeout, "job timed out");
                    JobStatus::Failed {
                        error: format!("timed out after {job_timeout:?}"),
                    }
                },
            };
            jobs.lock().record_terminal(id, status, max_finished);
        });

        id
    }

    pub fn status(&self, id: &JobId) -> Option<JobStatus> {
        self.jobs.lock().statuses.get(id).cloned()
    }
}
