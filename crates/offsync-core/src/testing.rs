//! In-crate fakes shared by unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::clock::Clock;
use crate::db::{ActionFilter, ActionRepository, MetricsRepository, QueueRepository};
use crate::error::{Error, Result};
use crate::models::{
    Action, ActionId, ActionPayload, QueueItem, QueueItemDraft, QueueItemId, QueueStatus,
    RetryMetrics,
};
use crate::sync::{AuthorityError, RemoteAuthority, RemoteState, SubmitOutcome};
use crate::util::signed_ms;

/// Clock that follows tokio time, so paused-time tests move it too
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
    start_ms: i64,
}

impl TokioClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            start_ms,
        }
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        self.start_ms.saturating_add(signed_ms(self.origin.elapsed()))
    }
}

pub fn create_post(local_id: &str) -> Action {
    Action::new(
        "npub1",
        ActionPayload::CreatePost {
            content: format!("post {local_id}"),
            topic_id: "rust".into(),
            reply_to: None,
            quoted_post: None,
        },
    )
    .with_local_id(local_id)
}

pub fn like(local_id: &str, post_id: &str) -> Action {
    Action::new(
        "npub1",
        ActionPayload::LikePost {
            post_id: post_id.into(),
        },
    )
    .with_local_id(local_id)
}

/// Action repository backed by a map, with switchable failure injection
#[derive(Default)]
pub struct MemoryActionRepository {
    rows: Mutex<BTreeMap<String, Action>>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryActionRepository {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn stored(&self, local_id: &str) -> Option<Action> {
        self.rows.lock().unwrap().get(local_id).cloned()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Database("disk I/O error".into()))
        } else {
            Ok(())
        }
    }
}

impl ActionRepository for MemoryActionRepository {
    async fn list(&self, user_key: &str, filter: ActionFilter) -> Result<Vec<Action>> {
        self.check()?;
        let mut actions: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|action| action.user_key == user_key)
            .filter(|action| match filter {
                ActionFilter::Pending => !action.is_synced,
                ActionFilter::Synced => action.is_synced,
                ActionFilter::All => true,
            })
            .cloned()
            .collect();
        actions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.local_id.cmp(&b.local_id))
        });
        Ok(actions)
    }

    async fn save(&self, action: &Action) -> Result<()> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.rows
            .lock()
            .unwrap()
            .insert(action.local_id.to_string(), action.clone());
        Ok(())
    }

    async fn delete(&self, local_id: &ActionId) -> Result<()> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().unwrap().remove(local_id.as_str());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMetricsRepository {
    rows: Mutex<BTreeMap<String, RetryMetrics>>,
}

impl MetricsRepository for MemoryMetricsRepository {
    async fn load(&self, reason: &str) -> Result<RetryMetrics> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(reason)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, reason: &str, metrics: &RetryMetrics, _now: i64) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .insert(reason.to_string(), metrics.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, RetryMetrics)>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|(reason, metrics)| (reason.clone(), metrics.clone()))
            .collect())
    }
}

/// Queue storage kept in memory, ids assigned in insertion order
#[derive(Default)]
pub struct MemoryQueueRepository {
    items: Mutex<BTreeMap<i64, QueueItem>>,
    failing: AtomicBool,
}

impl MemoryQueueRepository {
    /// Make lookups fail; enqueueing keeps working
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl QueueRepository for MemoryQueueRepository {
    async fn enqueue(&self, draft: &QueueItemDraft, now: i64) -> Result<QueueItem> {
        let mut items = self.items.lock().unwrap();
        let id = items.keys().next_back().map_or(1, |last| last + 1);
        let item = QueueItem {
            id: QueueItemId(id),
            action_type: draft.action_type.clone(),
            payload: draft.payload.clone(),
            priority: draft.priority,
            status: QueueStatus::Pending,
            retry_count: 0,
            max_retries: draft.max_retries,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        items.insert(id, item.clone());
        Ok(item)
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Database("queue table is locked".into()));
        }
        Ok(self.items.lock().unwrap().get(&id.0).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<QueueItem>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_retryable(&self) -> Result<Vec<QueueItem>> {
        let mut items: Vec<_> = self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|item| item.status == QueueStatus::Pending || item.is_retryable())
            .cloned()
            .collect();
        items.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn update(&self, item: &QueueItem) -> Result<()> {
        let mut items = self.items.lock().unwrap();
        let stored = items
            .get_mut(&item.id.0)
            .ok_or_else(|| Error::NotFound(format!("queue item {}", item.id)))?;
        if stored.status == QueueStatus::Completed && stored != item {
            return Err(Error::InvalidState(format!("queue item {} is completed", item.id)));
        }
        *stored = item.clone();
        Ok(())
    }
}

enum Reply {
    Respond(std::result::Result<SubmitOutcome, AuthorityError>),
    Hang,
}

/// Authority that answers from a per-action script.
///
/// Unscripted actions are accepted; creations get `remote-<local_id>`.
#[derive(Default)]
pub struct ScriptedAuthority {
    script: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<Action>>,
    delay: Option<Duration>,
}

impl ScriptedAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn reply(
        &self,
        local_id: &str,
        reply: std::result::Result<SubmitOutcome, AuthorityError>,
    ) -> &Self {
        self.push(local_id, Reply::Respond(reply));
        self
    }

    pub fn conflict(&self, local_id: &str, state: RemoteState) -> &Self {
        self.reply(local_id, Ok(SubmitOutcome::Conflict(state)))
    }

    pub fn fail(&self, local_id: &str, error: AuthorityError) -> &Self {
        self.reply(local_id, Err(error))
    }

    /// Never answer; exercises the request timeout
    pub fn hang(&self, local_id: &str) -> &Self {
        self.push(local_id, Reply::Hang);
        self
    }

    pub fn calls(&self) -> Vec<Action> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn push(&self, local_id: &str, reply: Reply) {
        self.script
            .lock()
            .unwrap()
            .entry(local_id.to_string())
            .or_default()
            .push_back(reply);
    }
}

impl RemoteAuthority for ScriptedAuthority {
    async fn submit(
        &self,
        action: &Action,
    ) -> std::result::Result<SubmitOutcome, AuthorityError> {
        self.calls.lock().unwrap().push(action.clone());
        let reply = self
            .script
            .lock()
            .unwrap()
            .get_mut(action.local_id.as_str())
            .and_then(VecDeque::pop_front);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(Reply::Respond(reply)) => reply,
            Some(Reply::Hang) => std::future::pending().await,
            None => Ok(SubmitOutcome::Accepted {
                remote_id: action
                    .action_type
                    .has_remote_identity()
                    .then(|| format!("remote-{}", action.local_id)),
            }),
        }
    }
}
