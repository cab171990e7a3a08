//! Single-flight sync coordination.
//!
//! The coordinator owns the `Idle -> Syncing -> Idle` state machine and
//! applies pass results to the store, the optimistic updates, the active
//! conflict set, and the retry scheduler. Background jobs reach it only as
//! [`WorkerEvent`]s.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::db::{ActionRepository, MetricsRepository, QueueRepository};
use crate::error::{Error, Result};
use crate::models::{
    Action, ActionId, OutcomeMeta, QueueItem, QueueItemDraft, QueueItemId, Resolution,
    RetryOutcome, SyncConflict, SyncResult, UpdateId,
};
use crate::optimistic::OptimisticUpdateManager;
use crate::retry::{RetryJob, RetryScheduler, ScheduledRetry};
use crate::state::{SyncState, SyncStatus};
use crate::store::OfflineActionStore;
use crate::sync::{AppliedAction, ConflictResolver, DifferentialSyncEngine, RemoteAuthority};
use crate::util::{duration_ms, signed_ms};
use crate::worker::{wait_until, JobRequest, WorkerEvent, WorkerHandle};

/// Retry job shared by every pass that left failed actions behind
pub const SYNC_RETRY_JOB_ID: &str = "sync-retry";
pub const SYNC_RETRY_REASON: &str = "sync_failures";
const QUEUE_JOB_PREFIX: &str = "queue-";

/// What started a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Manual,
    Reconnect,
    Retry,
    Background,
    Periodic,
}

impl SyncTrigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Reconnect => "reconnect",
            Self::Retry => "retry",
            Self::Background => "background",
            Self::Periodic => "periodic",
        }
    }

    /// Metrics key for passes started this way
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Manual => "manual_sync",
            Self::Reconnect => "reconnect_sync",
            Self::Retry => SYNC_RETRY_REASON,
            Self::Background => "background_sync",
            Self::Periodic => "periodic_sync",
        }
    }

    const fn job_id(self) -> &'static str {
        match self {
            Self::Manual => "manual-sync",
            Self::Reconnect => "reconnect-sync",
            Self::Retry => SYNC_RETRY_JOB_ID,
            Self::Background => "background-sync",
            Self::Periodic => "periodic-sync",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    AlreadySyncing,
    NothingToSync,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Offline => "offline, sync suppressed",
            Self::AlreadySyncing => "a sync pass is already running",
            Self::NothingToSync => "no pending actions to sync",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every pending action was classified
    Completed {
        result: SyncResult,
        retry: Option<ScheduledRetry>,
    },
    /// The pass stopped early on a transient failure; nothing was applied
    Aborted {
        error: String,
        retry: Option<ScheduledRetry>,
    },
    Skipped(SkipReason),
}

impl SyncOutcome {
    /// No failed actions were left behind. Conflicts still count as success.
    pub const fn is_success(&self) -> bool {
        match self {
            Self::Completed { result, .. } => !result.has_failures(),
            Self::Skipped(reason) => matches!(reason, SkipReason::NothingToSync),
            Self::Aborted { .. } => false,
        }
    }

    pub const fn retry(&self) -> Option<&ScheduledRetry> {
        match self {
            Self::Completed { retry, .. } | Self::Aborted { retry, .. } => retry.as_ref(),
            Self::Skipped(_) => None,
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { result, .. } => write!(
                f,
                "synced {}, conflicts {}, failed {}",
                result.synced_actions.len(),
                result.conflicts.len(),
                result.failed_actions.len()
            ),
            Self::Aborted { error, .. } => write!(f, "aborted: {error}"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundRequest {
    Enqueued { job_id: String },
    /// A request was accepted too recently
    CoolingDown { retry_after: Duration },
}

/// Resets the state machine to `Idle` however the pass ends.
struct PassGuard<'a> {
    flag: &'a AtomicBool,
    status: &'a StdMutex<SyncStatus>,
}

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool, status: &'a StdMutex<SyncStatus>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        lock(status).is_syncing = true;
        Some(Self { flag, status })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        lock(self.status).is_syncing = false;
        self.flag.store(false, Ordering::Release);
    }
}

fn lock(status: &StdMutex<SyncStatus>) -> MutexGuard<'_, SyncStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SyncCoordinator<A, R, M, Q> {
    store: Arc<OfflineActionStore<R>>,
    updates: Arc<Mutex<OptimisticUpdateManager>>,
    engine: DifferentialSyncEngine<A>,
    resolver: ConflictResolver<A, R>,
    retries: RetryScheduler<M>,
    queue: Q,
    worker: Option<WorkerHandle>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    syncing: AtomicBool,
    /// Serializes passes with conflict resolution
    serial: Mutex<()>,
    status: StdMutex<SyncStatus>,
    conflicts: Mutex<Vec<SyncConflict>>,
    retry_attempt: AtomicU32,
    background_due: Mutex<HashMap<String, i64>>,
    last_background_request: Mutex<Option<i64>>,
}

impl<A, R, M, Q> SyncCoordinator<A, R, M, Q>
where
    A: RemoteAuthority,
    R: ActionRepository,
    M: MetricsRepository,
    Q: QueueRepository,
{
    pub fn new(
        store: Arc<OfflineActionStore<R>>,
        authority: Arc<A>,
        metrics: M,
        queue: Q,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let updates = Arc::new(Mutex::new(OptimisticUpdateManager::new()));
        let engine = DifferentialSyncEngine::new(
            Arc::clone(&authority),
            Arc::clone(&clock),
            config.request_timeout,
        );
        let resolver = ConflictResolver::new(
            authority,
            Arc::clone(&store),
            Arc::clone(&updates),
            Arc::clone(&clock),
            config.request_timeout,
        );
        let retries = RetryScheduler::new(&config, Arc::clone(&clock), metrics);
        Self {
            store,
            updates,
            engine,
            resolver,
            retries,
            queue,
            worker: None,
            clock,
            config,
            syncing: AtomicBool::new(false),
            serial: Mutex::new(()),
            status: StdMutex::new(SyncStatus::default()),
            conflicts: Mutex::new(Vec::new()),
            retry_attempt: AtomicU32::new(0),
            background_due: Mutex::new(HashMap::new()),
            last_background_request: Mutex::new(None),
        }
    }

    /// Route background sync requests through `worker`.
    #[must_use]
    pub fn with_worker(mut self, worker: WorkerHandle) -> Self {
        self.worker = Some(worker);
        self
    }

    pub const fn store(&self) -> &Arc<OfflineActionStore<R>> {
        &self.store
    }

    pub const fn updates(&self) -> &Arc<Mutex<OptimisticUpdateManager>> {
        &self.updates
    }

    pub const fn retries(&self) -> &RetryScheduler<M> {
        &self.retries
    }

    pub const fn engine(&self) -> &DifferentialSyncEngine<A> {
        &self.engine
    }

    pub fn state(&self) -> SyncState {
        if self.syncing.load(Ordering::Acquire) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    /// Hydrate the pending set from durable storage.
    pub async fn load(&self, user_key: &str) -> Result<usize> {
        self.store.load_pending_actions(user_key).await
    }

    /// Queue an action; `false` when it was already pending.
    pub async fn record_action(&self, action: Action) -> Result<bool> {
        self.store.add_pending_action(action).await
    }

    /// Queue an action together with the optimistic change it stands for.
    ///
    /// The update is rolled back if the action cannot be persisted.
    pub async fn record_optimistic_action(
        &self,
        action: Action,
        original_data: impl Into<String>,
        updated_data: impl Into<String>,
    ) -> Result<UpdateId> {
        let update_id = {
            let mut updates = self.updates.lock().await;
            let update_id = updates.apply(
                action.entity_type,
                action.entity_id.clone(),
                original_data,
                updated_data,
                self.clock.now_ms(),
            );
            updates.bind(&update_id, action.local_id.clone())?;
            update_id
        };

        if let Err(err) = self.store.add_pending_action(action).await {
            if let Err(rollback_err) = self.updates.lock().await.rollback(&update_id) {
                warn!(%update_id, error = %rollback_err, "Failed to roll back optimistic update");
            }
            return Err(err);
        }
        Ok(update_id)
    }

    /// Flip connectivity; coming back online with pending work starts a pass.
    pub async fn set_online(&self, is_online: bool) -> Result<Option<SyncOutcome>> {
        let was_online = self.store.is_online().await;
        self.store.set_online_status(is_online).await;
        if is_online && !was_online {
            info!("Connectivity restored");
            return self.run_pass(SyncTrigger::Reconnect).await.map(Some);
        }
        Ok(None)
    }

    pub async fn trigger_sync(&self) -> Result<SyncOutcome> {
        self.run_pass(SyncTrigger::Manual).await
    }

    /// Run one pass per due retry.
    pub async fn run_due_retries(&self) -> Result<Vec<SyncOutcome>> {
        let mut outcomes = Vec::new();
        for retry in self.retries.due_jobs().await {
            debug!(job_id = %retry.job.job_id, retry_count = retry.job.retry_count, "Retry due");
            self.retry_attempt
                .store(retry.job.retry_count + 1, Ordering::SeqCst);
            outcomes.push(self.run_pass(SyncTrigger::Retry).await?);
        }
        Ok(outcomes)
    }

    pub fn update_progress(&self, processed: usize, total: usize) {
        lock(&self.status).set_progress(processed, total);
    }

    /// Drive syncing for `user_key` until `shutdown` resolves.
    ///
    /// Loads the pending set, syncs right away, then runs a pass every
    /// `sync_interval` and fires scheduled retries as they fall due. Pass
    /// errors are logged and the loop keeps going.
    pub async fn run(&self, user_key: &str, shutdown: impl Future<Output = ()>) -> Result<()> {
        let loaded = self.load(user_key).await?;
        info!(user_key, loaded, "Sync driver started");

        tokio::pin!(shutdown);
        let mut ticker = interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let next_retry = self.retries.next_due_at().await.map(|due| self.deadline(due));
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    let outcome = self.run_pass(SyncTrigger::Periodic).await;
                    log_outcome(SyncTrigger::Periodic, &outcome);
                }
                () = wait_until(next_retry) => match self.run_due_retries().await {
                    Ok(outcomes) => {
                        for outcome in &outcomes {
                            debug!(%outcome, "Retry pass finished");
                        }
                    }
                    Err(err) => warn!(error = %err, "Retry pass failed"),
                },
            }
        }
        info!(user_key, "Sync driver stopped");
        Ok(())
    }

    /// Tokio deadline for a clock timestamp.
    fn deadline(&self, due_at: i64) -> Instant {
        let wait = u64::try_from(due_at.saturating_sub(self.clock.now_ms())).unwrap_or(0);
        Instant::now() + Duration::from_millis(wait)
    }

    /// Snapshot for the presentation layer.
    pub async fn status(&self) -> SyncStatus {
        let mut status = lock(&self.status).clone();
        status.is_syncing = self.state() == SyncState::Syncing;
        status.conflicts = self.conflicts.lock().await.clone();
        status.last_sync_time = self.store.last_synced_at().await;
        let background = self.background_due.lock().await.values().min().copied();
        status.next_retry_at = [self.retries.next_due_at().await, background]
            .into_iter()
            .flatten()
            .min();
        status
    }

    pub async fn active_conflicts(&self) -> Vec<SyncConflict> {
        self.conflicts.lock().await.clone()
    }

    pub async fn conflict(&self, local_id: &ActionId) -> Option<SyncConflict> {
        self.conflicts
            .lock()
            .await
            .iter()
            .find(|c| c.id() == local_id)
            .cloned()
    }

    /// Apply a resolution; the conflict leaves the active set only on success.
    pub async fn resolve_conflict(
        &self,
        local_id: &ActionId,
        resolution: Resolution,
    ) -> Result<AppliedAction> {
        let _serial = self.serial.lock().await;
        let conflict = self
            .conflict(local_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("conflict {local_id}")))?;

        let applied = self.resolver.resolve(&conflict, resolution).await?;
        self.conflicts.lock().await.retain(|c| c.id() != local_id);
        Ok(applied)
    }

    /// Suggested resolution for an active conflict.
    pub async fn recommend(&self, local_id: &ActionId) -> Result<Resolution> {
        let conflict = self
            .conflict(local_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("conflict {local_id}")))?;
        Ok(self.resolver.recommend(&conflict))
    }

    /// Build merged data for an active conflict so `merge` becomes available.
    pub async fn propose_merge(&self, local_id: &ActionId) -> Result<SyncConflict> {
        let mut conflicts = self.conflicts.lock().await;
        let conflict = conflicts
            .iter_mut()
            .find(|c| c.id() == local_id)
            .ok_or_else(|| Error::NotFound(format!("conflict {local_id}")))?;
        *conflict = self.resolver.propose_merge(conflict)?;
        Ok(conflict.clone())
    }

    /// Ask the background worker for a pass, at most once per cooldown window.
    pub async fn request_background_sync(&self, reason: &str) -> Result<BackgroundRequest> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no background worker attached".into()))?;

        let now = self.clock.now_ms();
        let cooldown = signed_ms(self.config.background_cooldown);
        let mut last = self.last_background_request.lock().await;
        if let Some(at) = *last {
            let elapsed = now.saturating_sub(at);
            if elapsed < cooldown {
                let wait = u64::try_from(cooldown - elapsed).unwrap_or(0);
                debug!(reason, retry_after_ms = wait, "Background sync cooling down");
                return Ok(BackgroundRequest::CoolingDown {
                    retry_after: Duration::from_millis(wait),
                });
            }
        }

        let job_id = worker.enqueue(
            JobRequest::new(reason)
                .with_retry_policy(self.config.max_retries, self.retries.backoff_delay(0)),
        )?;
        *last = Some(now);
        info!(%job_id, reason, "Background sync requested");
        Ok(BackgroundRequest::Enqueued { job_id })
    }

    /// Persist a sync request as a queue item and hand it to the worker.
    pub async fn enqueue_sync_request(&self, draft: QueueItemDraft) -> Result<QueueItem> {
        let item = self.queue.enqueue(&draft, self.clock.now_ms()).await?;
        if let Some(worker) = &self.worker {
            worker.enqueue(JobRequest {
                job_id: Some(format!("{QUEUE_JOB_PREFIX}{}", item.id)),
                reason: Some(item.action_type.clone()),
                max_retries: Some(item.max_retries),
                retry_delay: Some(self.retries.backoff_delay(0)),
                ..JobRequest::default()
            })?;
        }
        debug!(id = %item.id, action_type = %item.action_type, "Sync request queued");
        Ok(item)
    }

    /// Most recent queue items, bounded by the configured history limit.
    pub async fn queue_history(&self) -> Result<Vec<QueueItem>> {
        self.queue.list_recent(self.config.queue_history_limit).await
    }

    /// Work through retryable queue items inline, highest priority first.
    pub async fn drain_queue(&self) -> Result<Vec<(QueueItemId, SyncOutcome)>> {
        let mut processed = Vec::new();
        for item in self.queue.list_retryable().await? {
            let id = item.id;
            let outcome = self
                .process_queue_item(item, &format!("{QUEUE_JOB_PREFIX}{id}"))
                .await?;
            processed.push((id, outcome));
        }
        Ok(processed)
    }

    /// React to a worker notification.
    ///
    /// `Process` runs a pass and reports completion back to the worker.
    pub async fn handle_worker_event(&self, event: WorkerEvent) -> Result<Option<SyncOutcome>> {
        match event {
            WorkerEvent::Scheduled(info) => {
                debug!(
                    job_id = %info.job_id,
                    retry_count = info.retry_count,
                    next_run_at = info.next_run_at,
                    "Background job scheduled"
                );
                self.background_due
                    .lock()
                    .await
                    .insert(info.job_id, info.next_run_at);
                Ok(None)
            }
            WorkerEvent::Process(job) => {
                self.background_due.lock().await.remove(&job.job_id);
                let outcome = match queue_item_id(&job.job_id) {
                    Some(id) => match self.queue.get(id).await {
                        Ok(Some(item)) => self.process_queue_item(item, &job.job_id).await,
                        Ok(None) => Err(Error::NotFound(format!("queue item {id}"))),
                        Err(err) => Err(err),
                    },
                    None => self.run_pass_as(SyncTrigger::Background, &job.job_id).await,
                };

                let success = matches!(&outcome, Ok(outcome) if outcome.is_success());
                if let Some(worker) = &self.worker {
                    worker.complete(job.job_id.as_str(), success)?;
                }
                outcome.map(Some)
            }
        }
    }

    async fn process_queue_item(&self, mut item: QueueItem, job_id: &str) -> Result<SyncOutcome> {
        item.start_processing(self.clock.now_ms())?;
        self.queue.update(&item).await?;

        let outcome = self.run_pass_as(SyncTrigger::Background, job_id).await;
        let now = self.clock.now_ms();
        match &outcome {
            Ok(done) if done.is_success() => item.complete(now)?,
            Ok(done) => item.fail(done.to_string(), now)?,
            Err(err) => item.fail(err.to_string(), now)?,
        }
        self.queue.update(&item).await?;
        debug!(id = %item.id, status = item.status.as_str(), "Queue item processed");
        outcome
    }

    async fn run_pass(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        self.run_pass_as(trigger, trigger.job_id()).await
    }

    async fn run_pass_as(&self, trigger: SyncTrigger, job_id: &str) -> Result<SyncOutcome> {
        if !self.store.is_online().await {
            info!(trigger = trigger.as_str(), "Sync skipped: offline");
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }
        if self.store.pending_count().await == 0 {
            debug!(trigger = trigger.as_str(), "Sync skipped: nothing pending");
            return Ok(SyncOutcome::Skipped(SkipReason::NothingToSync));
        }
        let Some(_guard) = PassGuard::acquire(&self.syncing, &self.status) else {
            warn!(trigger = trigger.as_str(), "Sync rejected: already syncing");
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadySyncing));
        };
        let _serial = self.serial.lock().await;
        if trigger != SyncTrigger::Retry {
            self.retry_attempt.store(0, Ordering::SeqCst);
        }

        // Conflicted actions wait for an explicit resolution.
        let conflicted: HashSet<ActionId> = self
            .conflicts
            .lock()
            .await
            .iter()
            .map(|c| c.id().clone())
            .collect();
        let pending: Vec<Action> = self
            .store
            .pending_actions()
            .await
            .into_iter()
            .filter(|action| !conflicted.contains(&action.local_id))
            .collect();
        if pending.is_empty() {
            debug!(
                trigger = trigger.as_str(),
                conflicted = conflicted.len(),
                "Sync skipped: only conflicted actions pending"
            );
            return Ok(SyncOutcome::Skipped(SkipReason::NothingToSync));
        }
        let total = pending.len();
        {
            let mut status = lock(&self.status);
            status.error = None;
            status.synced_items = 0;
            status.set_progress(0, total);
        }
        info!(trigger = trigger.as_str(), total, "Sync pass started");

        let started = self.clock.now_ms();
        let pass = self
            .engine
            .sync_with_progress(&pending, |done, total| self.update_progress(done, total))
            .await;
        let duration = u64::try_from(self.clock.now_ms().saturating_sub(started)).unwrap_or(0);

        let outcome = match pass {
            Ok(result) => self.finish_pass(trigger, job_id, result, duration).await,
            Err(err) => self.abort_pass(trigger, job_id, err, total, duration).await,
        };
        if let Err(err) = &outcome {
            error!(trigger = trigger.as_str(), error = %err, "Sync pass failed");
            lock(&self.status).error = Some(err.to_string());
        }
        outcome
    }

    async fn finish_pass(
        &self,
        trigger: SyncTrigger,
        job_id: &str,
        result: SyncResult,
        duration: u64,
    ) -> Result<SyncOutcome> {
        {
            let mut active = self.conflicts.lock().await;
            for conflict in &result.conflicts {
                active.retain(|c| c.id() != conflict.id());
                active.push(conflict.clone());
            }
            active.retain(|c| {
                !result
                    .synced_actions
                    .iter()
                    .any(|action| &action.local_id == c.id())
            });
        }

        // The first storage error is returned once every action has been tried.
        let mut apply_error = None;
        for action in &result.synced_actions {
            let applied = match self.store.mark_synced(action).await {
                Ok(()) => self.confirm_update(&action.local_id).await,
                Err(err) => Err(err),
            };
            if let Err(err) = applied {
                warn!(local_id = %action.local_id, error = %err, "Failed to apply synced action");
                apply_error.get_or_insert(err);
            }
        }
        for action in &result.failed_actions {
            let reason = result.failure_reason(&action.local_id).unwrap_or("sync failed");
            self.store.set_sync_error(&action.local_id, reason).await;
        }

        let now = self.clock.now_ms();
        self.store.record_sync_time(now).await;

        let retry = if result.has_failures() {
            self.schedule_sync_retry(trigger).await
        } else {
            self.retry_attempt.store(0, Ordering::SeqCst);
            self.retries.cancel(SYNC_RETRY_JOB_ID).await;
            None
        };

        let outcome = if result.has_failures() {
            RetryOutcome::Failure
        } else {
            RetryOutcome::Success
        };
        self.record_outcome(
            trigger,
            job_id,
            outcome,
            OutcomeMeta {
                success_count: u32::try_from(result.synced_actions.len()).ok(),
                failure_count: u32::try_from(result.failed_actions.len()).ok(),
                duration_ms: Some(duration),
                backoff_ms: retry.as_ref().map(|r| duration_ms(r.delay)),
                retry_count: retry.as_ref().map(|r| r.job.retry_count),
                max_retries: Some(self.config.max_retries),
                ..OutcomeMeta::default()
            },
        )
        .await;

        {
            let mut status = lock(&self.status);
            status.set_progress(result.total_processed, result.total_processed);
            status.synced_items = result.synced_actions.len();
        }
        if let Some(err) = apply_error {
            return Err(err);
        }
        info!(
            trigger = trigger.as_str(),
            synced = result.synced_actions.len(),
            conflicts = result.conflicts.len(),
            failed = result.failed_actions.len(),
            "Sync pass applied"
        );
        Ok(SyncOutcome::Completed { result, retry })
    }

    async fn abort_pass(
        &self,
        trigger: SyncTrigger,
        job_id: &str,
        err: Error,
        total: usize,
        duration: u64,
    ) -> Result<SyncOutcome> {
        let retry = if err.is_transient() {
            self.schedule_sync_retry(trigger).await
        } else {
            None
        };
        self.record_outcome(
            trigger,
            job_id,
            RetryOutcome::Failure,
            OutcomeMeta {
                success_count: Some(0),
                failure_count: u32::try_from(total).ok(),
                duration_ms: Some(duration),
                backoff_ms: retry.as_ref().map(|r| duration_ms(r.delay)),
                retry_count: retry.as_ref().map(|r| r.job.retry_count),
                max_retries: Some(self.config.max_retries),
                ..OutcomeMeta::default()
            },
        )
        .await;

        if !err.is_transient() {
            return Err(err);
        }
        let message = err.to_string();
        warn!(trigger = trigger.as_str(), error = %message, "Sync pass aborted");
        lock(&self.status).error = Some(message.clone());
        Ok(SyncOutcome::Aborted {
            error: message,
            retry,
        })
    }

    async fn schedule_sync_retry(&self, trigger: SyncTrigger) -> Option<ScheduledRetry> {
        let job = RetryJob::new(SYNC_RETRY_JOB_ID, SYNC_RETRY_REASON, self.config.max_retries)
            .with_trigger(trigger.as_str())
            .with_retry_count(self.retry_attempt.load(Ordering::SeqCst));
        self.retries.schedule_retry(job).await
    }

    async fn record_outcome(
        &self,
        trigger: SyncTrigger,
        job_id: &str,
        outcome: RetryOutcome,
        meta: OutcomeMeta,
    ) {
        let meta = OutcomeMeta {
            reason: Some(trigger.reason().to_string()),
            trigger: Some(trigger.as_str().to_string()),
            ..meta
        };
        if let Err(err) = self.retries.record_outcome(job_id, outcome, meta).await {
            warn!(job_id, error = %err, "Failed to record retry outcome");
        }
    }

    async fn confirm_update(&self, local_id: &ActionId) -> Result<()> {
        let mut updates = self.updates.lock().await;
        if let Some(update_id) = updates.update_for_action(local_id).cloned() {
            updates.confirm(&update_id, self.clock.now_ms())?;
        }
        Ok(())
    }
}

fn log_outcome(trigger: SyncTrigger, outcome: &Result<SyncOutcome>) {
    match outcome {
        Ok(SyncOutcome::Skipped(reason)) => {
            debug!(trigger = trigger.as_str(), %reason, "Sync pass skipped");
        }
        Ok(outcome) => info!(trigger = trigger.as_str(), %outcome, "Sync pass finished"),
        Err(err) => warn!(trigger = trigger.as_str(), error = %err, "Sync pass failed"),
    }
}

fn queue_item_id(job_id: &str) -> Option<QueueItemId> {
    job_id
        .strip_prefix(QUEUE_JOB_PREFIX)
        .and_then(|id| id.parse().ok())
        .map(QueueItemId)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::ConflictType;
    use crate::sync::{AuthorityError, RemoteState};
    use crate::testing::{
        create_post, like, MemoryActionRepository, MemoryMetricsRepository,
        MemoryQueueRepository, ScriptedAuthority, TokioClock,
    };
    use crate::worker::BackgroundWorker;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    type TestCoordinator = SyncCoordinator<
        ScriptedAuthority,
        MemoryActionRepository,
        MemoryMetricsRepository,
        MemoryQueueRepository,
    >;

    fn coordinator(authority: ScriptedAuthority, clock: &ManualClock) -> TestCoordinator {
        coordinator_with(authority, Arc::new(clock.clone()))
    }

    fn coordinator_with(authority: ScriptedAuthority, clock: Arc<dyn Clock>) -> TestCoordinator {
        let store = Arc::new(OfflineActionStore::new(
            MemoryActionRepository::default(),
            true,
        ));
        SyncCoordinator::new(
            store,
            Arc::new(authority),
            MemoryMetricsRepository::default(),
            MemoryQueueRepository::default(),
            clock,
            SyncConfig::default(),
        )
    }

    fn completed(outcome: SyncOutcome) -> (SyncResult, Option<ScheduledRetry>) {
        match outcome {
            SyncOutcome::Completed { result, retry } => (result, retry),
            other => panic!("expected a completed pass, got {other:?}"),
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> WorkerEvent {
        events.recv().await.expect("worker stopped")
    }

    #[tokio::test]
    async fn test_accepted_action_leaves_pending_set() {
        let clock = ManualClock::new(5_000);
        let coordinator = coordinator(ScriptedAuthority::new(), &clock);
        let action = create_post("1");
        coordinator.record_action(action.clone()).await.unwrap();

        let (result, retry) = completed(coordinator.trigger_sync().await.unwrap());

        assert_eq!(result.synced_actions.len(), 1);
        assert_eq!(result.synced_actions[0].local_id, action.local_id);
        assert!(result.conflicts.is_empty());
        assert!(result.failed_actions.is_empty());
        assert_eq!(result.total_processed, 1);
        assert!(retry.is_none());
        assert_eq!(coordinator.store().pending_count().await, 0);
        assert!(coordinator.store().repository().stored("1").unwrap().is_synced);

        let status = coordinator.status().await;
        assert!(!status.is_syncing);
        assert!((status.progress - 100.0).abs() < f64::EPSILON);
        assert_eq!(status.synced_items, 1);
        assert_eq!(status.last_sync_time, Some(5_000));
        assert_eq!(coordinator.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_conflict_stays_pending_until_resolved() {
        let clock = ManualClock::new(0);
        let authority = ScriptedAuthority::new();
        authority.conflict(
            "1",
            RemoteState {
                local_version: Some(1),
                remote_version: Some(2),
                ..RemoteState::default()
            },
        );
        let coordinator = coordinator(authority, &clock);
        let action = create_post("1");
        coordinator.record_action(action.clone()).await.unwrap();

        let (result, _) = completed(coordinator.trigger_sync().await.unwrap());
        assert_eq!(result.conflicts[0].conflict_type, ConflictType::Version);
        assert_eq!(coordinator.store().pending_count().await, 1);
        assert_eq!(coordinator.status().await.conflicts.len(), 1);

        let err = coordinator
            .resolve_conflict(&action.local_id, Resolution::Merge)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResolution(_)));
        let err = coordinator
            .resolve_conflict(&action.local_id, Resolution::Remote)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResolution(_)));
        assert_eq!(coordinator.active_conflicts().await.len(), 1);
        assert_eq!(coordinator.store().pending_count().await, 1);

        let applied = coordinator
            .resolve_conflict(&action.local_id, Resolution::Local)
            .await
            .unwrap();
        assert!(applied.action.is_synced);
        assert!(coordinator.active_conflicts().await.is_empty());
        assert_eq!(coordinator.store().pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_resolution_keeps_conflict_active() {
        let clock = ManualClock::new(0);
        let authority = ScriptedAuthority::new();
        authority
            .conflict("1", RemoteState::default())
            .fail("1", AuthorityError::Transient("503".into()));
        let coordinator = coordinator(authority, &clock);
        let action = like("1", "p1");
        coordinator.record_action(action.clone()).await.unwrap();
        coordinator.trigger_sync().await.unwrap();

        let err = coordinator
            .resolve_conflict(&action.local_id, Resolution::Local)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(coordinator.active_conflicts().await.len(), 1);
        assert_eq!(coordinator.store().pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_resolving_unknown_conflict_is_not_found() {
        let coordinator = coordinator(ScriptedAuthority::new(), &ManualClock::new(0));
        let err = coordinator
            .resolve_conflict(&ActionId::from("missing"), Resolution::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_skips_report_why() {
        let clock = ManualClock::new(0);
        let coordinator = coordinator(ScriptedAuthority::new(), &clock);

        assert_eq!(
            coordinator.trigger_sync().await.unwrap(),
            SyncOutcome::Skipped(SkipReason::NothingToSync)
        );

        coordinator.record_action(create_post("1")).await.unwrap();
        coordinator.set_online(false).await.unwrap();
        assert_eq!(
            coordinator.trigger_sync().await.unwrap(),
            SyncOutcome::Skipped(SkipReason::Offline)
        );
        assert_eq!(coordinator.engine().authority().call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_trigger_while_syncing_is_rejected() {
        let clock = ManualClock::new(0);
        let authority = ScriptedAuthority::new().with_delay(Duration::from_secs(1));
        let coordinator = coordinator(authority, &clock);
        coordinator.record_action(create_post("1")).await.unwrap();

        let (first, second) = tokio::join!(coordinator.trigger_sync(), coordinator.trigger_sync());

        assert!(matches!(first.unwrap(), SyncOutcome::Completed { .. }));
        assert_eq!(
            second.unwrap(),
            SyncOutcome::Skipped(SkipReason::AlreadySyncing)
        );
        assert_eq!(coordinator.engine().authority().call_count(), 1);
        assert_eq!(coordinator.state(), SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_schedules_first_retry_at_base_delay() {
        let clock = ManualClock::new(1_000);
        let authority = ScriptedAuthority::new();
        authority.hang("1");
        let coordinator = coordinator(authority, &clock);
        let action = create_post("1");
        coordinator.record_action(action.clone()).await.unwrap();

        let (result, retry) = completed(coordinator.trigger_sync().await.unwrap());

        assert_eq!(result.failed_actions.len(), 1);
        let retry = retry.unwrap();
        assert_eq!(retry.job.retry_count, 0);
        assert_eq!(retry.delay, Duration::from_secs(5));
        assert_eq!(coordinator.retries().scheduled().await.len(), 1);
        assert_eq!(coordinator.store().pending_count().await, 1);
        assert!(coordinator
            .store()
            .sync_error(&action.local_id)
            .await
            .is_some());
        assert_eq!(coordinator.status().await.next_retry_at, Some(retry.due_at));

        assert!(coordinator.run_due_retries().await.unwrap().is_empty());
        clock.advance(Duration::from_secs(5));
        let outcomes = coordinator.run_due_retries().await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_success());
        assert_eq!(coordinator.store().pending_count().await, 0);
        assert!(coordinator.retries().scheduled().await.is_empty());
        let metrics = coordinator
            .retries()
            .metrics(SYNC_RETRY_REASON)
            .await
            .unwrap();
        assert_eq!(metrics.total_success, 1);
        let manual = coordinator.retries().metrics("manual_sync").await.unwrap();
        assert_eq!(manual.total_failure, 1);
        assert_eq!(manual.last.unwrap().failure_count, Some(1));
    }

    #[tokio::test]
    async fn test_consecutive_failures_back_off_further() {
        let clock = ManualClock::new(0);
        let authority = ScriptedAuthority::new();
        authority
            .fail("1", AuthorityError::Transient("503".into()))
            .fail("1", AuthorityError::Transient("503".into()));
        let coordinator = coordinator(authority, &clock);
        coordinator.record_action(like("1", "p1")).await.unwrap();

        let first = coordinator.trigger_sync().await.unwrap();
        assert_eq!(first.retry().unwrap().delay, Duration::from_secs(5));

        clock.advance(Duration::from_secs(5));
        let outcomes = coordinator.run_due_retries().await.unwrap();
        let second = outcomes[0].retry().unwrap();
        assert_eq!(second.job.retry_count, 1);
        assert_eq!(second.delay, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_fatal_error_propagates_and_returns_to_idle() {
        let clock = ManualClock::new(0);
        let authority = ScriptedAuthority::new();
        authority.fail("1", AuthorityError::Unauthorized("token expired".into()));
        let coordinator = coordinator(authority, &clock);
        coordinator.record_action(create_post("1")).await.unwrap();

        let err = coordinator.trigger_sync().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(coordinator.state(), SyncState::Idle);
        let status = coordinator.status().await;
        assert!(!status.is_syncing);
        assert!(status.error.unwrap().contains("token expired"));
        assert_eq!(coordinator.store().pending_count().await, 1);
        assert!(coordinator.retries().scheduled().await.is_empty());

        let (result, _) = completed(coordinator.trigger_sync().await.unwrap());
        assert_eq!(result.synced_actions.len(), 1);
        assert!(coordinator.status().await.error.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_authority_aborts_and_retries() {
        let clock = ManualClock::new(0);
        let authority = ScriptedAuthority::new();
        authority.fail("1", AuthorityError::Unreachable("connection refused".into()));
        let coordinator = coordinator(authority, &clock);
        coordinator.record_action(create_post("1")).await.unwrap();
        coordinator.record_action(like("2", "p1")).await.unwrap();

        let outcome = coordinator.trigger_sync().await.unwrap();
        let SyncOutcome::Aborted { error, retry } = outcome else {
            panic!("expected an aborted pass");
        };
        assert!(error.contains("connection refused"));
        assert_eq!(retry.unwrap().job.retry_count, 0);
        assert_eq!(coordinator.store().pending_count().await, 2);
        assert_eq!(coordinator.engine().authority().call_count(), 1);
    }

    #[tokio::test]
    async fn test_optimistic_update_follows_action_outcome() {
        let clock = ManualClock::new(0);
        let coordinator = coordinator(ScriptedAuthority::new(), &clock);

        let update_id = coordinator
            .record_optimistic_action(like("1", "p1"), r#"{"liked":false}"#, r#"{"liked":true}"#)
            .await
            .unwrap();
        coordinator.trigger_sync().await.unwrap();
        assert!(coordinator
            .updates()
            .lock()
            .await
            .get(&update_id)
            .unwrap()
            .is_confirmed);

        coordinator.store().repository().set_failing(true);
        let err = coordinator
            .record_optimistic_action(like("2", "p2"), "{}", r#"{"liked":true}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(coordinator.updates().lock().await.unconfirmed().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_triggers_pass() {
        let clock = ManualClock::new(0);
        let coordinator = coordinator(ScriptedAuthority::new(), &clock);
        coordinator.set_online(false).await.unwrap();
        coordinator.record_action(create_post("1")).await.unwrap();

        assert!(coordinator.set_online(false).await.unwrap().is_none());
        let outcome = coordinator.set_online(true).await.unwrap().unwrap();
        assert!(outcome.is_success());
        assert_eq!(coordinator.store().pending_count().await, 0);
        assert!(coordinator.set_online(true).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_requests_are_rate_limited() {
        let clock = ManualClock::new(0);
        let (handle, mut events, _task) = BackgroundWorker::spawn(Arc::new(clock.clone()));
        let coordinator = coordinator(ScriptedAuthority::new(), &clock).with_worker(handle);
        coordinator.record_action(create_post("1")).await.unwrap();

        let BackgroundRequest::Enqueued { job_id } = coordinator
            .request_background_sync("connectivity")
            .await
            .unwrap()
        else {
            panic!("expected the first request to be accepted");
        };
        clock.advance(Duration::from_secs(10));
        assert_eq!(
            coordinator
                .request_background_sync("pending_changed")
                .await
                .unwrap(),
            BackgroundRequest::CoolingDown {
                retry_after: Duration::from_secs(20)
            }
        );

        let scheduled = next_event(&mut events).await;
        assert!(coordinator.handle_worker_event(scheduled).await.unwrap().is_none());
        let WorkerEvent::Process(job) = next_event(&mut events).await else {
            panic!("expected a process event");
        };
        assert_eq!(job.job_id, job_id);
        let outcome = coordinator
            .handle_worker_event(WorkerEvent::Process(job))
            .await
            .unwrap()
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(coordinator.engine().authority().call_count(), 1);
        assert_eq!(coordinator.status().await.next_retry_at, None);

        clock.advance(Duration::from_secs(20));
        assert!(matches!(
            coordinator.request_background_sync("connectivity").await,
            Ok(BackgroundRequest::Enqueued { .. })
        ));
    }

    #[tokio::test]
    async fn test_background_request_needs_worker() {
        let coordinator = coordinator(ScriptedAuthority::new(), &ManualClock::new(0));
        assert!(matches!(
            coordinator.request_background_sync("manual").await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_request_runs_through_worker() {
        let clock = ManualClock::new(0);
        let (handle, mut events, _task) = BackgroundWorker::spawn(Arc::new(clock.clone()));
        let coordinator = coordinator(ScriptedAuthority::new(), &clock).with_worker(handle);
        coordinator.record_action(create_post("1")).await.unwrap();

        let item = coordinator
            .enqueue_sync_request(QueueItemDraft::new(
                "manual_sync",
                serde_json::json!({ "userKey": "npub1" }),
            ))
            .await
            .unwrap();

        loop {
            let event = next_event(&mut events).await;
            let is_process = matches!(event, WorkerEvent::Process(_));
            coordinator.handle_worker_event(event).await.unwrap();
            if is_process {
                break;
            }
        }

        let history = coordinator.queue_history().await.unwrap();
        assert_eq!(history[0].id, item.id);
        assert_eq!(history[0].status, crate::models::QueueStatus::Completed);
        assert_eq!(coordinator.store().pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_drain_fails_queue_items_while_offline() {
        let clock = ManualClock::new(0);
        let coordinator = coordinator(ScriptedAuthority::new(), &clock);
        coordinator.record_action(create_post("1")).await.unwrap();
        coordinator.set_online(false).await.unwrap();
        coordinator
            .enqueue_sync_request(QueueItemDraft::new("manual_sync", serde_json::json!({})))
            .await
            .unwrap();

        let processed = coordinator.drain_queue().await.unwrap();
        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].1, SyncOutcome::Skipped(SkipReason::Offline));

        let item = &coordinator.queue_history().await.unwrap()[0];
        assert_eq!(item.status, crate::models::QueueStatus::Failed);
        assert_eq!(item.retry_count, 1);
        assert!(item.error_message.as_deref().unwrap().contains("offline"));
    }

    #[tokio::test]
    async fn test_conflicted_action_is_not_resubmitted() {
        let clock = ManualClock::new(0);
        let authority = ScriptedAuthority::new();
        authority.conflict("1", RemoteState::default());
        let coordinator = coordinator(authority, &clock);
        let action = create_post("1");
        coordinator.record_action(action.clone()).await.unwrap();
        coordinator.record_action(like("2", "p1")).await.unwrap();

        let (first, _) = completed(coordinator.trigger_sync().await.unwrap());
        assert_eq!(first.conflicts.len(), 1);
        assert_eq!(first.synced_actions.len(), 1);

        assert_eq!(
            coordinator.trigger_sync().await.unwrap(),
            SyncOutcome::Skipped(SkipReason::NothingToSync)
        );
        assert_eq!(coordinator.engine().authority().call_count(), 2);
        assert_eq!(coordinator.store().pending_count().await, 1);
        assert_eq!(coordinator.active_conflicts().await.len(), 1);

        coordinator
            .resolve_conflict(&action.local_id, Resolution::Local)
            .await
            .unwrap();
        assert_eq!(coordinator.engine().authority().call_count(), 3);
        assert!(coordinator.active_conflicts().await.is_empty());
        assert_eq!(coordinator.store().pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_new_pass_after_exhausted_retries_starts_backoff_over() {
        let clock = ManualClock::new(0);
        let authority = ScriptedAuthority::new();
        for _ in 0..5 {
            authority.fail("1", AuthorityError::Transient("503".into()));
        }
        let coordinator = coordinator(authority, &clock);
        coordinator.record_action(like("1", "p1")).await.unwrap();

        let first = coordinator.trigger_sync().await.unwrap();
        assert_eq!(first.retry().unwrap().job.retry_count, 0);

        let mut retry_counts = Vec::new();
        for _ in 0..3 {
            clock.advance(Duration::from_secs(300));
            let outcomes = coordinator.run_due_retries().await.unwrap();
            assert_eq!(outcomes.len(), 1);
            retry_counts.push(outcomes[0].retry().map(|r| r.job.retry_count));
        }
        assert_eq!(retry_counts, vec![Some(1), Some(2), None]);
        assert!(coordinator.retries().scheduled().await.is_empty());

        clock.advance(Duration::from_secs(3_600));
        let later = coordinator.trigger_sync().await.unwrap();
        let retry = later.retry().unwrap();
        assert_eq!(retry.job.retry_count, 0);
        assert_eq!(retry.delay, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_storage_error_still_applies_conflicts() {
        let clock = ManualClock::new(0);
        let authority = ScriptedAuthority::new();
        authority.conflict("2", RemoteState::default());
        let coordinator = coordinator(authority, &clock);
        coordinator.record_action(create_post("1")).await.unwrap();
        coordinator.record_action(like("2", "p1")).await.unwrap();

        coordinator.store().repository().set_failing(true);
        let err = coordinator.trigger_sync().await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert_eq!(coordinator.active_conflicts().await.len(), 1);
        assert_eq!(coordinator.store().pending_count().await, 2);
        assert!(coordinator.status().await.error.is_some());
        assert_eq!(coordinator.state(), SyncState::Idle);

        coordinator.store().repository().set_failing(false);
        let (result, _) = completed(coordinator.trigger_sync().await.unwrap());
        assert_eq!(result.synced_actions.len(), 1);
        assert!(result.conflicts.is_empty());
        assert_eq!(coordinator.engine().authority().call_count(), 3);
        assert_eq!(coordinator.store().pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_status_counts_processed_separately_from_synced() {
        let clock = ManualClock::new(0);
        let authority = ScriptedAuthority::new();
        authority
            .conflict("2", RemoteState::default())
            .fail("3", AuthorityError::Transient("503".into()));
        let coordinator = coordinator(authority, &clock);
        coordinator.record_action(create_post("1")).await.unwrap();
        coordinator.record_action(like("2", "p1")).await.unwrap();
        coordinator.record_action(like("3", "p2")).await.unwrap();

        coordinator.update_progress(2, 3);
        let during = coordinator.status().await;
        assert_eq!(during.processed_items, 2);
        assert_eq!(during.synced_items, 0);

        coordinator.trigger_sync().await.unwrap();
        let status = coordinator.status().await;
        assert_eq!(status.processed_items, 3);
        assert_eq!(status.total_items, 3);
        assert_eq!(status.synced_items, 1);
        assert!((status.progress - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_lookup_error_still_reports_job_to_worker() {
        let clock = ManualClock::new(0);
        let (handle, mut events, _task) = BackgroundWorker::spawn(Arc::new(clock.clone()));
        let coordinator = coordinator(ScriptedAuthority::new(), &clock).with_worker(handle);
        coordinator.record_action(create_post("1")).await.unwrap();
        let item = coordinator
            .enqueue_sync_request(QueueItemDraft::new("manual_sync", serde_json::json!({})))
            .await
            .unwrap();

        let scheduled = next_event(&mut events).await;
        coordinator.handle_worker_event(scheduled).await.unwrap();
        let process = next_event(&mut events).await;
        assert!(matches!(process, WorkerEvent::Process(_)));

        coordinator.queue.set_failing(true);
        let err = coordinator.handle_worker_event(process).await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));

        let WorkerEvent::Scheduled(info) = next_event(&mut events).await else {
            panic!("expected the failed job to be rescheduled");
        };
        assert_eq!(info.job_id, format!("{QUEUE_JOB_PREFIX}{}", item.id));
        assert_eq!(info.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_syncs_on_start_and_fires_due_retry() {
        let authority = ScriptedAuthority::new();
        authority.fail("1", AuthorityError::Transient("503".into()));
        let coordinator = coordinator_with(authority, Arc::new(TokioClock::new(1_000)));
        coordinator
            .store()
            .repository()
            .save(&like("1", "p1"))
            .await
            .unwrap();

        coordinator
            .run("npub1", tokio::time::sleep(Duration::from_secs(7)))
            .await
            .unwrap();

        assert_eq!(coordinator.engine().authority().call_count(), 2);
        assert_eq!(coordinator.store().pending_count().await, 0);
        assert!(coordinator.retries().scheduled().await.is_empty());
        let retried = coordinator
            .retries()
            .metrics(SYNC_RETRY_REASON)
            .await
            .unwrap();
        assert_eq!(retried.total_success, 1);
        let periodic = coordinator.retries().metrics("periodic_sync").await.unwrap();
        assert_eq!(periodic.total_failure, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_picks_up_new_actions_on_interval() {
        let coordinator =
            coordinator_with(ScriptedAuthority::new(), Arc::new(TokioClock::new(0)));

        let record_later = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            coordinator.record_action(create_post("1")).await.unwrap();
            assert_eq!(coordinator.store().pending_count().await, 1);
        };
        let (driven, ()) = tokio::join!(
            coordinator.run("npub1", tokio::time::sleep(Duration::from_secs(31))),
            record_later
        );

        driven.unwrap();
        assert_eq!(coordinator.engine().authority().call_count(), 1);
        assert_eq!(coordinator.store().pending_count().await, 0);
    }
}
