//! Failure mode — what happens to a job a worker could not finish.
//!
//! `handle_failure` is called only when a worker dies while holding a
//! job — a panic or an aborted task, observed at the monitor's
//! `JoinHandle` boundary. An ordinary `WorkerModule::call` error is a
//! completed job (acked, reply delivered) and never reaches here.
//! `handle_failure` runs after the job has already been rejected and
//! requeued at the backend. Implementations must be idempotent:
//! at-least-once delivery means the same job can reach `handle_failure`
//! more than once.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::Job;

/// A job that exhausted its retries or failed in a way the pool gave up
/// on, plus context about why.
#[derive(Debug, Clone)]
pub struct FailedJob {
    pub job: Job,
    pub reason: String,
    pub failed_at_millis: u64,
}

impl FailedJob {
    pub fn new(job: Job, reason: impl Into<String>) -> Self {
        Self {
            job,
            reason: reason.into(),
            failed_at_millis: now_millis(),
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Routes jobs a worker could not complete. Application-level concern —
/// the backend handles retry/requeue natively, this trait is what runs
/// once a job has been given up on.
#[async_trait]
pub trait FailureMode: Send + Sync {
    async fn handle_failure(&self, failed: FailedJob) -> Result<()>;

    /// Number of jobs currently retained by this failure mode.
    async fn count(&self) -> Result<usize>;

    /// Most recently failed jobs, most recent first.
    async fn recent(&self, limit: usize) -> Result<Vec<FailedJob>>;
}

/// Retains failed jobs in memory, bounded by `max_jobs`. Suitable for
/// tests and small embedded pools; anything that needs durability past a
/// process restart should implement `FailureMode` over a real store.
pub struct MemoryFailureMode {
    jobs: Arc<RwLock<Vec<FailedJob>>>,
    max_jobs: usize,
}

impl MemoryFailureMode {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(Vec::new())),
            max_jobs,
        }
    }
}

impl Default for MemoryFailureMode {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl FailureMode for MemoryFailureMode {
    async fn handle_failure(&self, failed: FailedJob) -> Result<()> {
        tracing::warn!(
            job_id = %failed.job.id,
            method = %failed.job.task.method_name(),
            reason = %failed.reason,
            "job failed permanently"
        );

        let mut jobs = self.jobs.write().await;
        jobs.push(failed);

        if self.max_jobs > 0 && jobs.len() > self.max_jobs {
            let drain_count = jobs.len() - self.max_jobs;
            jobs.drain(..drain_count);
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.jobs.read().await.len())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<FailedJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Task;

    fn failed(reason: &str) -> FailedJob {
        FailedJob::new(Job::new(Task::method("noop")), reason)
    }

    #[tokio::test]
    async fn test_handle_failure_and_count() {
        let fm = MemoryFailureMode::default();
        assert_eq!(fm.count().await.unwrap(), 0);
        fm.handle_failure(failed("boom")).await.unwrap();
        assert_eq!(fm.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recent_returns_most_recent_first() {
        let fm = MemoryFailureMode::default();
        for i in 0..5 {
            fm.handle_failure(failed(&format!("reason {i}"))).await.unwrap();
        }
        let recent = fm.recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].reason, "reason 4");
    }

    #[tokio::test]
    async fn test_max_capacity_drains_oldest() {
        let fm = MemoryFailureMode::new(3);
        for i in 0..5 {
            fm.handle_failure(failed(&format!("reason {i}"))).await.unwrap();
        }
        assert_eq!(fm.count().await.unwrap(), 3);
        let recent = fm.recent(10).await.unwrap();
        assert_eq!(recent[2].reason, "reason 2");
    }

    #[tokio::test]
    async fn test_handle_failure_is_idempotent_under_repeat_calls() {
        let fm = MemoryFailureMode::default();
        let f = failed("retry collision");
        fm.handle_failure(f.clone()).await.unwrap();
        fm.handle_failure(f).await.unwrap();
        assert_eq!(fm.count().await.unwrap(), 2);
    }
}
