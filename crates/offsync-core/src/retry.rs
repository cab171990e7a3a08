//! Exponential backoff scheduling and retry outcome metrics.
//!
//! Scheduled retries live in an inspectable delayed queue keyed by due time.
//! Nothing here sleeps: callers poll [`RetryScheduler::due_jobs`] (the
//! coordinator's `run` loop sleeps until [`RetryScheduler::next_due_at`]) and
//! time comes from the injected [`Clock`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::db::MetricsRepository;
use crate::error::Result;
use crate::models::{OutcomeMeta, RetryMetrics, RetryOutcome};
use crate::util::{self, duration_ms};

/// Reason used when an outcome carries none
pub const UNKNOWN_REASON: &str = "unknown";

/// A unit of work that may be retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryJob {
    pub job_id: String,
    pub reason: String,
    pub trigger: Option<String>,
    /// Attempts already retried; 0 for the first retry
    pub retry_count: u32,
    pub max_retries: u32,
}

impl RetryJob {
    pub fn new(job_id: impl Into<String>, reason: impl Into<String>, max_retries: u32) -> Self {
        Self {
            job_id: job_id.into(),
            reason: reason.into(),
            trigger: None,
            retry_count: 0,
            max_retries,
        }
    }

    #[must_use]
    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    #[must_use]
    pub const fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub const fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// A retry sitting in the delayed queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub job: RetryJob,
    pub delay: Duration,
    /// Unix ms
    pub due_at: i64,
}

#[derive(Default)]
struct DelayedQueue {
    entries: HashMap<String, ScheduledRetry>,
    /// (due_at, insertion sequence) -> job id
    order: BTreeMap<(i64, u64), String>,
    next_seq: u64,
}

impl DelayedQueue {
    fn insert(&mut self, retry: ScheduledRetry) {
        let key = (retry.due_at, self.next_seq);
        self.next_seq += 1;
        self.order.insert(key, retry.job.job_id.clone());
        self.entries.insert(retry.job.job_id.clone(), retry);
    }

    fn remove(&mut self, job_id: &str) -> Option<ScheduledRetry> {
        let retry = self.entries.remove(job_id)?;
        self.order.retain(|_, id| id != job_id);
        Some(retry)
    }

    fn pop_due(&mut self, now: i64) -> Vec<ScheduledRetry> {
        let later = self.order.split_off(&(now.saturating_add(1), 0));
        let due = std::mem::replace(&mut self.order, later);
        due.into_values()
            .filter_map(|job_id| self.entries.remove(&job_id))
            .collect()
    }
}

/// Backoff scheduler with per-reason outcome metrics.
pub struct RetryScheduler<M> {
    base_delay: Duration,
    max_delay: Duration,
    clock: Arc<dyn Clock>,
    repo: M,
    queue: Mutex<DelayedQueue>,
    metrics: RwLock<HashMap<String, RetryMetrics>>,
}

impl<M: MetricsRepository> RetryScheduler<M> {
    pub fn new(config: &SyncConfig, clock: Arc<dyn Clock>, repo: M) -> Self {
        Self {
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
            clock,
            repo,
            queue: Mutex::new(DelayedQueue::default()),
            metrics: RwLock::new(HashMap::new()),
        }
    }

    /// `min(base * 2^retry_count, max)`, saturating on overflow.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Queue a retry for `job`.
    ///
    /// Returns the already scheduled entry when the job is queued, and `None`
    /// when the job has used up its retries.
    pub async fn schedule_retry(&self, job: RetryJob) -> Option<ScheduledRetry> {
        let mut queue = self.queue.lock().await;
        if let Some(existing) = queue.entries.get(&job.job_id) {
            debug!(job_id = %job.job_id, due_at = existing.due_at, "Retry already scheduled");
            return Some(existing.clone());
        }
        if job.is_exhausted() {
            warn!(
                job_id = %job.job_id,
                reason = %job.reason,
                retry_count = job.retry_count,
                "Retries exhausted"
            );
            return None;
        }

        let delay = self.backoff_delay(job.retry_count);
        let due_at = util::due_at(self.clock.now_ms(), delay);
        info!(
            job_id = %job.job_id,
            reason = %job.reason,
            retry_count = job.retry_count,
            delay_ms = duration_ms(delay),
            "Retry scheduled"
        );
        let retry = ScheduledRetry { job, delay, due_at };
        queue.insert(retry.clone());
        Some(retry)
    }

    /// Remove and return every retry whose due time has passed, earliest first.
    pub async fn due_jobs(&self) -> Vec<ScheduledRetry> {
        let now = self.clock.now_ms();
        self.queue.lock().await.pop_due(now)
    }

    pub async fn cancel(&self, job_id: &str) -> bool {
        self.queue.lock().await.remove(job_id).is_some()
    }

    pub async fn is_scheduled(&self, job_id: &str) -> bool {
        self.queue.lock().await.entries.contains_key(job_id)
    }

    /// Queued retries ordered by due time.
    pub async fn scheduled(&self) -> Vec<ScheduledRetry> {
        let queue = self.queue.lock().await;
        queue
            .order
            .values()
            .filter_map(|job_id| queue.entries.get(job_id).cloned())
            .collect()
    }

    pub async fn next_due_at(&self) -> Option<i64> {
        self.queue
            .lock()
            .await
            .order
            .keys()
            .next()
            .map(|(due_at, _)| *due_at)
    }

    /// Fold an outcome into the metrics for its reason and persist them.
    ///
    /// A success also drops any retry still queued for the job.
    pub async fn record_outcome(
        &self,
        job_id: &str,
        outcome: RetryOutcome,
        meta: OutcomeMeta,
    ) -> Result<RetryMetrics> {
        let scheduled_reason = if outcome == RetryOutcome::Success {
            self.queue.lock().await.remove(job_id).map(|r| r.job.reason)
        } else {
            None
        };
        let reason = meta
            .reason
            .clone()
            .or(scheduled_reason)
            .unwrap_or_else(|| UNKNOWN_REASON.to_string());
        let meta = OutcomeMeta {
            job_id: Some(job_id.to_string()),
            reason: Some(reason.clone()),
            ..meta
        };

        let now = self.clock.now_ms();
        let mut cache = self.metrics.write().await;
        let mut metrics = match cache.get(&reason) {
            Some(cached) => cached.clone(),
            None => self.repo.load(&reason).await?,
        };
        metrics.record(outcome, &meta, now);
        self.repo.save(&reason, &metrics, now).await?;
        cache.insert(reason.clone(), metrics.clone());

        debug!(
            job_id,
            %reason,
            outcome = outcome.as_str(),
            consecutive_failure = metrics.consecutive_failure,
            "Retry outcome recorded"
        );
        Ok(metrics)
    }

    pub async fn metrics(&self, reason: &str) -> Result<RetryMetrics> {
        if let Some(cached) = self.metrics.read().await.get(reason) {
            return Ok(cached.clone());
        }
        self.repo.load(reason).await
    }

    pub async fn all_metrics(&self) -> Result<Vec<(String, RetryMetrics)>> {
        self.repo.list().await
    }
}
