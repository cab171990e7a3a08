//! Explicit conflict resolution.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use super::authority::{RemoteAuthority, SubmitOutcome};
use super::diff;
use crate::clock::Clock;
use crate::db::ActionRepository;
use crate::error::{Error, Result};
use crate::models::{Action, ActionPayload, ActionType, ConflictType, Resolution, SyncConflict};
use crate::optimistic::OptimisticUpdateManager;
use crate::store::OfflineActionStore;

/// Action that won a resolved conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedAction {
    pub action: Action,
    pub resolution: Resolution,
    /// Original snapshot of a rolled-back optimistic update, for the caller to restore
    pub restored_data: Option<String>,
}

pub struct ConflictResolver<A, R> {
    authority: Arc<A>,
    store: Arc<OfflineActionStore<R>>,
    updates: Arc<Mutex<OptimisticUpdateManager>>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
}

impl<A: RemoteAuthority, R: ActionRepository> ConflictResolver<A, R> {
    pub fn new(
        authority: Arc<A>,
        store: Arc<OfflineActionStore<R>>,
        updates: Arc<Mutex<OptimisticUpdateManager>>,
        clock: Arc<dyn Clock>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            authority,
            store,
            updates,
            clock,
            request_timeout,
        }
    }

    /// Apply `resolution` to `conflict`.
    ///
    /// `local` and `merge` resubmit to the authority; `remote` adopts the
    /// authority's action without a call. Any failure leaves the pending
    /// action and its optimistic update exactly as they were.
    pub async fn resolve(
        &self,
        conflict: &SyncConflict,
        resolution: Resolution,
    ) -> Result<AppliedAction> {
        conflict.check_resolution(resolution)?;
        let local = &conflict.local_action;

        let (action, restored_data) = match resolution {
            Resolution::Local => (self.resubmit(local.clone()).await?, None),
            Resolution::Merge => {
                let merged = conflict.merged_data.clone().ok_or_else(|| {
                    Error::InvalidResolution(format!(
                        "conflict {} has no merged data",
                        local.local_id
                    ))
                })?;
                (self.resubmit(local.with_payload(merged)?).await?, None)
            }
            Resolution::Remote => {
                let remote = conflict.remote_action.clone().ok_or_else(|| {
                    Error::InvalidResolution(format!(
                        "conflict {} has no remote action to accept",
                        local.local_id
                    ))
                })?;
                self.store.remove_pending_action(&local.local_id).await?;
                let restored = self.rollback_update(local).await?;
                return Ok(finish(remote, resolution, restored));
            }
        };

        self.store.mark_synced(&action).await?;
        self.confirm_update(local).await?;
        Ok(finish(action, resolution, restored_data))
    }

    /// Suggest a resolution without applying it.
    #[allow(clippy::unused_self)]
    pub fn recommend(&self, conflict: &SyncConflict) -> Resolution {
        recommend(conflict)
    }

    /// Attach a merged payload built from the local and remote actions.
    #[allow(clippy::unused_self)]
    pub fn propose_merge(&self, conflict: &SyncConflict) -> Result<SyncConflict> {
        let remote = conflict.remote_action.as_ref().ok_or_else(|| {
            Error::InvalidResolution(format!(
                "conflict {} has no remote action to merge with",
                conflict.id()
            ))
        })?;
        let merged = diff::propose_merge(&conflict.local_action.payload, &remote.payload)?;
        conflict.clone().with_merged_data(merged)
    }

    async fn resubmit(&self, mut action: Action) -> Result<Action> {
        let local_id = action.local_id.clone();
        let response = timeout(self.request_timeout, self.authority.submit(&action))
            .await
            .map_err(|_| {
                Error::Transient(format!(
                    "authority did not answer within {}s",
                    self.request_timeout.as_secs()
                ))
            })?;

        match response {
            Ok(SubmitOutcome::Accepted { remote_id }) => {
                action.mark_synced(remote_id, self.clock.now_ms())?;
                Ok(action)
            }
            Ok(SubmitOutcome::Conflict(state)) => {
                warn!(%local_id, "Authority still reports a conflict");
                Err(Error::Conflict {
                    entity: action.entity_key(),
                    message: format!(
                        "authority still holds a divergent {} record",
                        state.conflict_type().as_str()
                    ),
                })
            }
            Err(err) => {
                warn!(%local_id, error = %err, "Resolution submit failed");
                Err(err.into())
            }
        }
    }

    async fn confirm_update(&self, local: &Action) -> Result<()> {
        let mut updates = self.updates.lock().await;
        if let Some(update_id) = updates.update_for_action(&local.local_id).cloned() {
            updates.confirm(&update_id, self.clock.now_ms())?;
        }
        Ok(())
    }

    async fn rollback_update(&self, local: &Action) -> Result<Option<String>> {
        let mut updates = self.updates.lock().await;
        match updates.update_for_action(&local.local_id).cloned() {
            Some(update_id) => Ok(Some(updates.rollback(&update_id)?)),
            None => Ok(None),
        }
    }
}

fn finish(action: Action, resolution: Resolution, restored_data: Option<String>) -> AppliedAction {
    info!(
        local_id = %action.local_id,
        resolution = resolution.as_str(),
        "Conflict resolved"
    );
    AppliedAction {
        action,
        resolution,
        restored_data,
    }
}

/// Advice for a conflict.
///
/// Timestamp conflicts use last-write-wins on `created_at`; version conflicts
/// keep the side with the higher `version`. Merge conflicts follow per-type
/// rules: membership changes use last-write-wins, posts and likes keep the
/// local intent, and anything else takes the merged payload when one exists.
pub fn recommend(conflict: &SyncConflict) -> Resolution {
    match conflict.conflict_type {
        ConflictType::Timestamp => last_write_wins(conflict),
        ConflictType::Version => {
            let local = payload_version(&conflict.local_action.payload);
            let remote = conflict
                .remote_action
                .as_ref()
                .map_or(0, |remote| payload_version(&remote.payload));
            if local >= remote {
                Resolution::Local
            } else {
                Resolution::Remote
            }
        }
        ConflictType::Merge => match conflict.local_action.action_type {
            ActionType::JoinTopic | ActionType::LeaveTopic => last_write_wins(conflict),
            ActionType::CreatePost | ActionType::LikePost => Resolution::Local,
            _ if conflict.merged_data.is_some() => Resolution::Merge,
            _ => last_write_wins(conflict),
        },
    }
}

fn last_write_wins(conflict: &SyncConflict) -> Resolution {
    match &conflict.remote_action {
        Some(remote) if remote.created_at > conflict.local_action.created_at => Resolution::Remote,
        _ => Resolution::Local,
    }
}

/// `version` field of a payload, looking inside profile `fields` too
fn payload_version(payload: &ActionPayload) -> i64 {
    let Ok(value) = payload.to_value() else {
        return 0;
    };
    value
        .get("version")
        .or_else(|| value.get("fields").and_then(|fields| fields.get("version")))
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0)
}
