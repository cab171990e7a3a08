//! Per-action differential sync against the remote authority.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::authority::{RemoteAuthority, RemoteState, SubmitOutcome};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{Action, SyncConflict, SyncResult};

/// Stateless sync pass runner.
///
/// Single-flight is enforced by the coordinator; an engine can be shared
/// freely and every pass starts from the batch it is given.
pub struct DifferentialSyncEngine<A> {
    authority: Arc<A>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
}

enum Classified {
    Synced(Action),
    Conflict(SyncConflict),
    Failed(String),
}

impl<A: RemoteAuthority> DifferentialSyncEngine<A> {
    pub fn new(authority: Arc<A>, clock: Arc<dyn Clock>, request_timeout: Duration) -> Self {
        Self {
            authority,
            clock,
            request_timeout,
        }
    }

    pub const fn authority(&self) -> &Arc<A> {
        &self.authority
    }

    pub async fn sync(&self, pending: &[Action]) -> Result<SyncResult> {
        self.sync_with_progress(pending, |_, _| {}).await
    }

    /// Run one pass, calling `on_progress(processed, total)` after each action.
    ///
    /// Per-action failures land in the result. An `Err` means the whole pass
    /// failed and none of the input should be considered processed.
    pub async fn sync_with_progress(
        &self,
        pending: &[Action],
        mut on_progress: impl FnMut(usize, usize),
    ) -> Result<SyncResult> {
        validate_batch(pending)?;

        let total = pending.len();
        let mut result = SyncResult::default();
        for action in pending {
            match self.process(action).await? {
                Classified::Synced(synced) => result.push_synced(synced),
                Classified::Conflict(conflict) => result.push_conflict(conflict),
                Classified::Failed(reason) => result.push_failed(action.clone(), reason),
            }
            on_progress(result.total_processed, total);
        }

        info!(
            total,
            synced = result.synced_actions.len(),
            conflicts = result.conflicts.len(),
            failed = result.failed_actions.len(),
            "Sync pass finished"
        );
        Ok(result)
    }

    async fn process(&self, action: &Action) -> Result<Classified> {
        let local_id = &action.local_id;
        let response = match timeout(self.request_timeout, self.authority.submit(action)).await {
            Ok(response) => response,
            Err(_) => {
                let reason = format!(
                    "authority did not answer within {}s",
                    self.request_timeout.as_secs()
                );
                warn!(
                    %local_id,
                    action_type = %action.action_type,
                    %reason,
                    "Action timed out"
                );
                return Ok(Classified::Failed(reason));
            }
        };

        match response {
            Ok(SubmitOutcome::Accepted { remote_id }) => {
                let mut synced = action.clone();
                match synced.mark_synced(remote_id, self.clock.now_ms()) {
                    Ok(()) => {
                        debug!(%local_id, remote_id = ?synced.remote_id, "Action accepted");
                        Ok(Classified::Synced(synced))
                    }
                    Err(err) => {
                        warn!(%local_id, error = %err, "Accepted response was incomplete");
                        Ok(Classified::Failed(err.to_string()))
                    }
                }
            }
            Ok(SubmitOutcome::Conflict(state)) => {
                Ok(Classified::Conflict(conflict_for(action, state)))
            }
            Err(err) if err.aborts_pass() => {
                error!(%local_id, error = %err, "Aborting sync pass");
                Err(err.into())
            }
            Err(err) => {
                warn!(
                    %local_id,
                    action_type = %action.action_type,
                    error = %err,
                    "Action failed"
                );
                Ok(Classified::Failed(err.to_string()))
            }
        }
    }
}

fn validate_batch(pending: &[Action]) -> Result<()> {
    if pending.is_empty() {
        return Err(Error::InvalidInput("sync batch is empty".into()));
    }
    let mut seen = HashSet::with_capacity(pending.len());
    for action in pending {
        if !seen.insert(&action.local_id) {
            return Err(Error::InvalidInput(format!(
                "action {} appears twice in the batch",
                action.local_id
            )));
        }
    }
    Ok(())
}

fn conflict_for(action: &Action, mut state: RemoteState) -> SyncConflict {
    if state
        .merged_data
        .as_ref()
        .is_some_and(|merged| merged.action_type() != action.action_type)
    {
        warn!(local_id = %action.local_id, "Ignoring merged data of a different action type");
        state.merged_data = None;
    }

    let conflict_type = state.conflict_type();
    debug!(
        local_id = %action.local_id,
        conflict_type = conflict_type.as_str(),
        "Conflict detected"
    );
    let mut conflict =
        SyncConflict::new(action.clone(), conflict_type).with_remote_action(state.remote_action);
    conflict.merged_data = state.merged_data;
    conflict
}
