//! Owned set of not-yet-synced actions backed by durable storage.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::{ActionFilter, ActionRepository};
use crate::error::{Error, Result};
use crate::models::{Action, ActionId};

#[derive(Debug, Default)]
struct StoreState {
    pending: Vec<Action>,
    is_online: bool,
    sync_errors: HashMap<ActionId, String>,
    last_synced_at: Option<i64>,
}

/// Pending-action collection, serialized behind a single mutex.
///
/// Durable writes happen before the in-memory set changes, so a storage
/// failure leaves memory untouched.
pub struct OfflineActionStore<R> {
    repo: R,
    state: Mutex<StoreState>,
}

impl<R: ActionRepository> OfflineActionStore<R> {
    pub fn new(repo: R, is_online: bool) -> Self {
        Self {
            repo,
            state: Mutex::new(StoreState {
                is_online,
                ..StoreState::default()
            }),
        }
    }

    pub const fn repository(&self) -> &R {
        &self.repo
    }

    /// Append an action; returns `false` when its `local_id` is already pending.
    pub async fn add_pending_action(&self, action: Action) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.pending.iter().any(|a| a.local_id == action.local_id) {
            debug!(local_id = %action.local_id, "Action already pending");
            return Ok(false);
        }

        if let Err(error) = self.repo.save(&action).await {
            warn!(local_id = %action.local_id, %error, "Failed to persist pending action");
            return Err(error);
        }

        debug!(
            local_id = %action.local_id,
            action_type = %action.action_type,
            "Queued pending action"
        );
        state.pending.push(action);
        Ok(true)
    }

    /// Remove by identity; removing an unknown id is a no-op.
    pub async fn remove_pending_action(&self, local_id: &ActionId) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Err(error) = self.repo.delete(local_id).await {
            warn!(%local_id, %error, "Failed to delete pending action");
            return Err(error);
        }
        state.pending.retain(|a| &a.local_id != local_id);
        state.sync_errors.remove(local_id);
        Ok(())
    }

    /// Persist an accepted action and drop it from the pending set.
    pub async fn mark_synced(&self, action: &Action) -> Result<()> {
        if !action.is_synced {
            return Err(Error::InvalidState(format!(
                "action {} has not been accepted",
                action.local_id
            )));
        }

        let mut state = self.state.lock().await;
        if let Err(error) = self.repo.save(action).await {
            warn!(local_id = %action.local_id, %error, "Failed to persist synced action");
            return Err(error);
        }
        state.pending.retain(|a| a.local_id != action.local_id);
        state.sync_errors.remove(&action.local_id);
        if let Some(synced_at) = action.synced_at {
            bump(&mut state.last_synced_at, synced_at);
        }
        Ok(())
    }

    /// Replace the in-memory set with the durable pending actions of `user_key`.
    ///
    /// On failure the previous in-memory state is kept.
    pub async fn load_pending_actions(&self, user_key: &str) -> Result<usize> {
        let mut state = self.state.lock().await;
        let loaded = match self.repo.list(user_key, ActionFilter::Pending).await {
            Ok(loaded) => loaded,
            Err(error) => {
                warn!(user_key, %error, "Failed to load pending actions");
                return Err(error);
            }
        };

        let mut pending: Vec<Action> = Vec::with_capacity(loaded.len());
        for action in loaded {
            if !pending.iter().any(|a| a.local_id == action.local_id) {
                pending.push(action);
            }
        }
        state
            .sync_errors
            .retain(|id, _| pending.iter().any(|a| &a.local_id == id));
        state.pending = pending;
        debug!(user_key, count = state.pending.len(), "Loaded pending actions");
        Ok(state.pending.len())
    }

    /// Flip the connectivity flag. Callers observe the flag; nothing is triggered here.
    pub async fn set_online_status(&self, is_online: bool) {
        self.state.lock().await.is_online = is_online;
    }

    pub async fn is_online(&self) -> bool {
        self.state.lock().await.is_online
    }

    /// Snapshot of the pending set in insertion order
    pub async fn pending_actions(&self) -> Vec<Action> {
        self.state.lock().await.pending.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn get(&self, local_id: &ActionId) -> Option<Action> {
        self.state
            .lock()
            .await
            .pending
            .iter()
            .find(|a| &a.local_id == local_id)
            .cloned()
    }

    /// Attach an error marker to a pending action; unknown ids are ignored.
    pub async fn set_sync_error(&self, local_id: &ActionId, message: impl Into<String>) {
        let mut state = self.state.lock().await;
        if state.pending.iter().any(|a| &a.local_id == local_id) {
            state.sync_errors.insert(local_id.clone(), message.into());
        }
    }

    pub async fn clear_sync_error(&self, local_id: &ActionId) {
        self.state.lock().await.sync_errors.remove(local_id);
    }

    pub async fn sync_error(&self, local_id: &ActionId) -> Option<String> {
        self.state.lock().await.sync_errors.get(local_id).cloned()
    }

    pub async fn sync_errors(&self) -> HashMap<ActionId, String> {
        self.state.lock().await.sync_errors.clone()
    }

    /// Record a completed pass; the stamp never moves backwards.
    pub async fn record_sync_time(&self, at: i64) {
        bump(&mut self.state.lock().await.last_synced_at, at);
    }

    pub async fn last_synced_at(&self) -> Option<i64> {
        self.state.lock().await.last_synced_at
    }
}

fn bump(stamp: &mut Option<i64>, at: i64) {
    *stamp = Some(stamp.map_or(at, |current| current.max(at)));
}
