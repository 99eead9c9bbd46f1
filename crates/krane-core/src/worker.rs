//! Job workers — drive queued jobs through their phases.
//!
//! Each worker loops: dequeue (which acquires the per-deployment
//! exclusion), execute setup → run → finalize with retries, persist the
//! record, release. Shutdown closes the queue; in-flight phases are raced
//! against the shutdown signal so long-running pulls unblock, and anything
//! still queued terminates as failed/cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use krane_store::Store;

use crate::epoch_secs;
use crate::error::{Error, Result};
use crate::job::{self, Job, JobState, Phase};
use crate::queue::JobQueue;

/// Longest backoff between run attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// The phase functions a worker dispatches into.
///
/// Implemented by the reconciler; phases receive the job mutably so setup
/// can enrich the args (e.g. snapshot the containers to retire).
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Pre-run phase. Not retried; failure aborts the job.
    async fn setup(&self, job: &mut Job) -> Result<()>;

    /// The action itself. Retried per the job's retry policy on
    /// retriable errors.
    async fn run(&self, job: &mut Job) -> Result<()>;

    /// Cleanup phase. Not retried; whether it runs depends on the job
    /// kind and the run outcome.
    async fn finalize(&self, job: &mut Job) -> Result<()>;
}

struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    executor: Arc<dyn JobExecutor>,
    store: Arc<dyn Store>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        debug!(worker = self.id, "worker started");
        while let Some(mut job) = self.queue.next().await {
            self.execute(&mut job).await;
            self.queue.release(&job.deployment);
        }
        debug!(worker = self.id, "worker stopped");
    }

    async fn execute(&mut self, job: &mut Job) {
        job.state = JobState::Running;
        job.started_at = Some(epoch_secs());
        persist(self.store.as_ref(), job);
        info!(
            job = %job.id,
            deployment = %job.deployment,
            kind = %job.kind,
            "job started"
        );

        let outcome = self.phases(job).await;
        job.finish(outcome.err().map(|e| e.to_string()));
        persist(self.store.as_ref(), job);

        match job.state {
            JobState::Succeeded => info!(
                job = %job.id,
                deployment = %job.deployment,
                kind = %job.kind,
                attempts = job.attempts,
                "job succeeded"
            ),
            _ => warn!(
                job = %job.id,
                deployment = %job.deployment,
                kind = %job.kind,
                attempts = job.attempts,
                error = job.error.as_deref().unwrap_or(""),
                "job failed"
            ),
        }
    }

    /// Run the three phases, returning the job's overall result.
    async fn phases(&mut self, job: &mut Job) -> Result<()> {
        // Setup, no retry.
        let started = Instant::now();
        let setup = self.checked(self.executor.setup(job)).await;
        job.record_phase(Phase::Setup, started, &setup);
        persist(self.store.as_ref(), job);
        setup?;

        // Run, retried on retriable errors with capped exponential backoff.
        let attempts = job.retry_policy.max(1);
        let mut run_result: Result<()> = Ok(());
        for attempt in 1..=attempts {
            if attempt > 1 {
                let backoff = backoff_before(attempt);
                debug!(job = %job.id, attempt, backoff_secs = backoff.as_secs(), "retrying run");
                if !self.sleep_through(backoff).await {
                    run_result = Err(Error::Cancelled);
                    break;
                }
            }
            job.attempts = attempt;
            let started = Instant::now();
            run_result = self.checked(self.executor.run(job)).await;
            job.record_phase(Phase::Run, started, &run_result);
            persist(self.store.as_ref(), job);

            match &run_result {
                Ok(()) => break,
                Err(e) if e.is_retriable() && attempt < attempts => {
                    warn!(job = %job.id, attempt, error = %e, "run attempt failed");
                }
                Err(_) => break,
            }
        }

        // Finalize, per kind; its error never overwrites a run success.
        if job.kind.runs_finalize_on(run_result.is_ok()) {
            let started = Instant::now();
            let finalize = self.executor.finalize(job).await;
            job.record_phase(Phase::Finalize, started, &finalize);
            persist(self.store.as_ref(), job);
            if let Err(e) = finalize {
                warn!(job = %job.id, error = %e, "finalize failed");
                if run_result.is_ok() {
                    job.error = Some(e.to_string());
                }
            }
        }

        run_result
    }

    /// Race a phase future against shutdown so a blocked runtime call
    /// (an image pull, typically) unblocks when the process is draining.
    async fn checked(
        &self,
        phase: impl std::future::Future<Output = Result<()>>,
    ) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            result = phase => result,
            _ = shutdown.changed() => Err(Error::Cancelled),
        }
    }

    /// Sleep the backoff, cut short by shutdown. True if it ran to the end.
    async fn sleep_through(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown.changed() => false,
        }
    }
}

/// Backoff slept before the given run attempt (attempt numbering is
/// 1-based, so attempt 2 waits 1 s, attempt 3 waits 2 s, …, capped).
fn backoff_before(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(2).min(63);
    Duration::from_secs(1u64 << exp).min(MAX_BACKOFF)
}

/// Best-effort job record write.
///
/// The record lives in the deployment's `jobs:<name>` collection, which
/// does not exist before the first run and no longer exists after a
/// delete's finalize. Both cases are expected; the record is simply not
/// kept then.
fn persist(store: &dyn Store, job: &Job) {
    let collection = job::collection(&job.deployment);
    match store.has_collection(&collection) {
        Ok(true) => {
            if let Err(e) = job::save(store, job) {
                warn!(job = %job.id, error = %e, "failed to persist job record");
            }
        }
        Ok(false) => {
            debug!(job = %job.id, deployment = %job.deployment, "job collection absent, record not kept");
        }
        Err(e) => warn!(job = %job.id, error = %e, "failed to check job collection"),
    }
}

/// A set of spawned workers sharing one queue.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    store: Arc<dyn Store>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers onto the current tokio runtime.
    pub fn spawn(
        count: usize,
        queue: Arc<JobQueue>,
        executor: Arc<dyn JobExecutor>,
        store: Arc<dyn Store>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let handles = (0..count)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: queue.clone(),
                    executor: executor.clone(),
                    store: store.clone(),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        Self {
            queue,
            store,
            handles,
        }
    }

    /// Drain for shutdown: close the queue, record never-started jobs as
    /// cancelled, and wait for in-flight jobs to finish or abort.
    pub async fn drain(self) {
        let aborted = self.queue.close();
        for mut job in aborted {
            job.finish(Some(Error::Cancelled.to_string()));
            persist(self.store.as_ref(), &job);
        }
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("worker pool drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_before(2), Duration::from_secs(1));
        assert_eq!(backoff_before(3), Duration::from_secs(2));
        assert_eq!(backoff_before(4), Duration::from_secs(4));
        assert_eq!(backoff_before(8), Duration::from_secs(60));
        assert_eq!(backoff_before(100), Duration::from_secs(60));
    }
}
