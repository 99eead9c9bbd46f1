//! Bounded in-process job queue with per-deployment mutual exclusion.
//!
//! A single FIFO feeds every worker. A worker taking a job marks its
//! deployment busy for the whole job lifecycle; jobs for a busy deployment
//! are skipped (not stolen) until the deployment is released, which keeps
//! per-deployment FIFO order while letting different deployments proceed in
//! parallel.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

use crate::error::{Error, Result};
use crate::job::Job;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

struct QueueInner {
    jobs: VecDeque<Job>,
    busy: HashSet<String>,
    closed: bool,
}

/// Bounded FIFO of pending jobs.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                jobs: VecDeque::new(),
                busy: HashSet::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Append a job. Fails with `QueueFull` at capacity and `Cancelled`
    /// once the queue has been closed for shutdown.
    pub fn enqueue(&self, job: Job) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(Error::Cancelled);
            }
            if inner.jobs.len() >= self.capacity {
                return Err(Error::QueueFull);
            }
            inner.jobs.push_back(job);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Take the next job whose deployment is not currently busy, marking
    /// the deployment busy. Waits when nothing is eligible; returns `None`
    /// once the queue is closed.
    pub async fn next(&self) -> Option<Job> {
        loop {
            // Created before the check so a wakeup between check and await
            // is not lost.
            let notified = self.notify.notified();
            {
                let mut guard = self.inner.lock().unwrap();
                let QueueInner { jobs, busy, closed } = &mut *guard;
                let eligible = jobs
                    .iter()
                    .position(|job| !busy.contains(&job.deployment));
                if let Some(index) = eligible {
                    let job = jobs.remove(index).unwrap();
                    busy.insert(job.deployment.clone());
                    return Some(job);
                }
                if *closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release a deployment's exclusion after its job finished, making any
    /// deferred job for it eligible again.
    pub fn release(&self, deployment: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.busy.remove(deployment);
        }
        self.notify.notify_waiters();
    }

    /// Stop accepting jobs and drain the backlog. Returns the jobs that
    /// never started so the caller can mark them cancelled.
    pub fn close(&self) -> Vec<Job> {
        let drained = {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
            inner.jobs.drain(..).collect()
        };
        self.notify.notify_waiters();
        drained
    }

    /// Number of jobs waiting (not counting in-flight ones).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap();
        if !inner.jobs.is_empty() {
            debug!(pending = inner.jobs.len(), "queue dropped with pending jobs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::DeploymentConfig;
    use crate::job::JobArgs;

    fn job_for(name: &str) -> Job {
        Job::new(
            JobArgs::Run {
                config: DeploymentConfig {
                    name: name.to_string(),
                    image: "nginx".to_string(),
                    ..Default::default()
                },
                containers_to_remove: Vec::new(),
            },
            1,
        )
    }

    async fn next_now(queue: &JobQueue) -> Option<Job> {
        tokio::time::timeout(Duration::from_secs(1), queue.next())
            .await
            .expect("queue.next() should not block here")
    }

    #[tokio::test]
    async fn fifo_across_deployments() {
        let queue = JobQueue::new(8);
        queue.enqueue(job_for("a")).unwrap();
        queue.enqueue(job_for("b")).unwrap();

        assert_eq!(next_now(&queue).await.unwrap().deployment, "a");
        assert_eq!(next_now(&queue).await.unwrap().deployment, "b");
    }

    #[tokio::test]
    async fn busy_deployment_is_skipped_not_stolen() {
        let queue = JobQueue::new(8);
        queue.enqueue(job_for("a")).unwrap();
        queue.enqueue(job_for("a")).unwrap();
        queue.enqueue(job_for("b")).unwrap();

        let first = next_now(&queue).await.unwrap();
        assert_eq!(first.deployment, "a");

        // The second "a" job is deferred while "a" is busy; "b" goes first.
        let second = next_now(&queue).await.unwrap();
        assert_eq!(second.deployment, "b");

        // Releasing "a" makes its deferred job eligible again.
        queue.release("a");
        let third = next_now(&queue).await.unwrap();
        assert_eq!(third.deployment, "a");
    }

    #[tokio::test]
    async fn next_waits_until_release() {
        let queue = std::sync::Arc::new(JobQueue::new(8));
        queue.enqueue(job_for("a")).unwrap();
        queue.enqueue(job_for("a")).unwrap();
        let _running = next_now(&queue).await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        // Nothing eligible yet, so the waiter must still be pending.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.release("a");
        let job = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.unwrap().deployment, "a");
    }

    #[tokio::test]
    async fn overflow_fails_with_queue_full() {
        let queue = JobQueue::new(1);
        queue.enqueue(job_for("a")).unwrap();
        assert!(matches!(queue.enqueue(job_for("b")), Err(Error::QueueFull)));
    }

    #[tokio::test]
    async fn close_drains_and_rejects() {
        let queue = JobQueue::new(8);
        queue.enqueue(job_for("a")).unwrap();
        queue.enqueue(job_for("b")).unwrap();

        let drained = queue.close();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
        assert!(matches!(queue.enqueue(job_for("c")), Err(Error::Cancelled)));
        assert!(next_now(&queue).await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_waiting_workers() {
        let queue = std::sync::Arc::new(JobQueue::new(8));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }
}
