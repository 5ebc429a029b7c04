// SPDX-License-Identifier: MIT OR Apache-2.0
//! One-shot delayed message scheduling.
//!
//! `op.cron.schedule` enqueues a single future delivery; the scheduler
//! owns the sleeping task and the job row. Jobs are tenant-scoped, not
//! connection-scoped: the registering client may disconnect and the job
//! still fires.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use arq_core::JsonMap;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

/// One scheduled delivery.
#[derive(Debug, Clone)]
pub struct CronJob {
    /// Server-assigned id (`cron_…`), echoed in the delivered envelope's
    /// `metadata.cron_job_id`.
    pub job_id: String,
    /// Target room.
    pub room: String,
    /// Target channel.
    pub channel: String,
    /// Payload of the delivered message.
    pub payload: JsonMap,
    /// When the job fires.
    pub fire_at: DateTime<Utc>,
    /// Owning tenant.
    pub tenant_id: String,
}

#[derive(Default)]
struct CronInner {
    jobs: Mutex<HashMap<String, CronJob>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

/// Owns every pending one-shot and its sleeping task.
#[derive(Clone, Default)]
pub struct CronScheduler {
    inner: Arc<CronInner>,
}

impl CronScheduler {
    /// Empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a one-shot. `fire` runs after `delay`; the scheduler
    /// removes the job row when the task completes or is cancelled.
    pub async fn schedule<F, Fut>(
        &self,
        room: &str,
        channel: &str,
        payload: JsonMap,
        tenant_id: &str,
        delay: Duration,
        fire: F,
    ) -> String
    where
        F: FnOnce(CronJob) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let job_id = format!("cron_{}", Uuid::new_v4().simple());
        let job = CronJob {
            job_id: job_id.clone(),
            room: room.to_string(),
            channel: channel.to_string(),
            payload,
            fire_at: Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
            tenant_id: tenant_id.to_string(),
        };

        self.inner.jobs.lock().await.insert(job_id.clone(), job.clone());

        let weak: Weak<CronInner> = Arc::downgrade(&self.inner);
        let task_job_id = job_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(job).await;
            if let Some(inner) = weak.upgrade() {
                inner.jobs.lock().await.remove(&task_job_id);
                inner.tasks.lock().await.remove(&task_job_id);
            }
        });
        self.inner.tasks.lock().await.insert(job_id.clone(), handle);

        job_id
    }

    /// Cancel a pending job. Returns `true` iff it was still pending.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let existed = self.inner.jobs.lock().await.remove(job_id).is_some();
        if let Some(handle) = self.inner.tasks.lock().await.remove(job_id) {
            handle.abort();
        }
        existed
    }

    /// Pending jobs, sorted by id.
    pub async fn jobs(&self) -> Vec<CronJob> {
        let jobs = self.inner.jobs.lock().await;
        let mut out: Vec<CronJob> = jobs.values().cloned().collect();
        out.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        out
    }

    /// Whether a job is still pending.
    pub async fn has_job(&self, job_id: &str) -> bool {
        self.inner.jobs.lock().await.contains_key(job_id)
    }

    /// Cancel everything at shutdown. A task that fails cleanup for a
    /// reason other than cancellation is logged and does not block
    /// shutdown.
    pub async fn cancel_all(&self) {
        let handles: Vec<(String, JoinHandle<()>)> =
            self.inner.tasks.lock().await.drain().collect();
        self.inner.jobs.lock().await.clear();

        for (job_id, handle) in handles {
            handle.abort();
            if let Err(err) = handle.await
                && !err.is_cancelled()
            {
                warn!(job_id = %job_id, error = %err, "Cron task cleanup failed during shutdown");
            }
        }
    }
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn scheduled_job_fires_and_self_cleans() {
        let scheduler = CronScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        let job_id = scheduler
            .schedule(
                "science",
                "general",
                JsonMap::new(),
                "default",
                Duration::from_millis(10),
                move |job| async move {
                    assert!(job.job_id.starts_with("cron_"));
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert!(scheduler.has_job(&job_id).await);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.has_job(&job_id).await);
    }

    #[tokio::test]
    async fn cancel_prevents_firing() {
        let scheduler = CronScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        let job_id = scheduler
            .schedule(
                "science",
                "general",
                JsonMap::new(),
                "default",
                Duration::from_millis(50),
                move |_| async move {
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert!(scheduler.cancel(&job_id).await);
        assert!(!scheduler.cancel(&job_id).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_all_drains_every_pending_job() {
        let scheduler = CronScheduler::new();
        for _ in 0..3 {
            scheduler
                .schedule(
                    "science",
                    "general",
                    JsonMap::new(),
                    "default",
                    Duration::from_secs(60),
                    move |_| async move {},
                )
                .await;
        }
        assert_eq!(scheduler.jobs().await.len(), 3);

        scheduler.cancel_all().await;
        assert!(scheduler.jobs().await.is_empty());
    }
}
