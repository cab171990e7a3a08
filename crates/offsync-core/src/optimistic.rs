//! Bookkeeping for tentative local mutations.
//!
//! The manager never touches domain state. Callers mutate their own state,
//! record the before/after snapshots here, and restore the snapshot returned
//! by [`OptimisticUpdateManager::rollback`] if the authority refuses.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{ActionId, EntityType, OptimisticUpdate, UpdateId};

#[derive(Debug, Default)]
pub struct OptimisticUpdateManager {
    updates: HashMap<UpdateId, OptimisticUpdate>,
    by_action: HashMap<ActionId, UpdateId>,
}

impl OptimisticUpdateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record pre-serialized snapshots and return the update's identity.
    pub fn apply(
        &mut self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        original_data: impl Into<String>,
        updated_data: impl Into<String>,
        now: i64,
    ) -> UpdateId {
        let update = OptimisticUpdate {
            update_id: UpdateId::new(),
            entity_type,
            entity_id: entity_id.into(),
            original_data: original_data.into(),
            updated_data: updated_data.into(),
            is_confirmed: false,
            created_at: now,
            confirmed_at: None,
        };
        let update_id = update.update_id.clone();
        debug!(
            %update_id,
            entity_type = %update.entity_type,
            entity_id = %update.entity_id,
            "Applied optimistic update"
        );
        self.updates.insert(update_id.clone(), update);
        update_id
    }

    /// Serialize both snapshots to JSON and record them.
    pub fn apply_value<T: Serialize>(
        &mut self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        original: &T,
        updated: &T,
        now: i64,
    ) -> Result<UpdateId> {
        let original = serde_json::to_string(original)?;
        let updated = serde_json::to_string(updated)?;
        Ok(self.apply(entity_type, entity_id, original, updated, now))
    }

    /// Tie an update to the action that will confirm or reject it.
    pub fn bind(&mut self, update_id: &UpdateId, local_id: ActionId) -> Result<()> {
        let update = self.pending(update_id)?;
        let update_id = update.update_id.clone();
        self.by_action.insert(local_id, update_id);
        Ok(())
    }

    pub fn update_for_action(&self, local_id: &ActionId) -> Option<&UpdateId> {
        self.by_action.get(local_id)
    }

    /// Make the update permanent; confirming twice is a no-op.
    pub fn confirm(&mut self, update_id: &UpdateId, now: i64) -> Result<()> {
        let update = self
            .updates
            .get_mut(update_id)
            .ok_or_else(|| Error::NotFound(format!("optimistic update {update_id}")))?;
        if !update.is_confirmed {
            update.is_confirmed = true;
            update.confirmed_at = Some(now);
            debug!(%update_id, "Confirmed optimistic update");
        }
        self.by_action.retain(|_, id| id != update_id);
        Ok(())
    }

    /// Remove an unconfirmed update and hand back its original snapshot.
    pub fn rollback(&mut self, update_id: &UpdateId) -> Result<String> {
        self.pending(update_id)?;
        let update = self
            .updates
            .remove(update_id)
            .ok_or_else(|| Error::NotFound(format!("optimistic update {update_id}")))?;
        self.by_action.retain(|_, id| id != update_id);
        debug!(%update_id, "Rolled back optimistic update");
        Ok(update.original_data)
    }

    pub fn get(&self, update_id: &UpdateId) -> Option<&OptimisticUpdate> {
        self.updates.get(update_id)
    }

    /// Unconfirmed updates, oldest first
    pub fn unconfirmed(&self) -> Vec<&OptimisticUpdate> {
        let mut pending: Vec<_> = self.updates.values().filter(|u| !u.is_confirmed).collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.update_id.as_str().cmp(b.update_id.as_str()))
        });
        pending
    }

    /// Drop confirmed records; returns how many were removed.
    pub fn prune_confirmed(&mut self) -> usize {
        let before = self.updates.len();
        self.updates.retain(|_, update| !update.is_confirmed);
        before - self.updates.len()
    }

    fn pending(&self, update_id: &UpdateId) -> Result<&OptimisticUpdate> {
        match self.updates.get(update_id) {
            Some(update) if !update.is_confirmed => Ok(update),
            Some(_) => Err(Error::NotFound(format!(
                "optimistic update {update_id} is already confirmed"
            ))),
            None => Err(Error::NotFound(format!("optimistic update {update_id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rollback_returns_original_snapshot() {
        let mut manager = OptimisticUpdateManager::new();
        let id = manager.apply(EntityType::Post, "p1", r#"{"likes":1}"#, r#"{"likes":2}"#, 10);

        assert_eq!(manager.rollback(&id).unwrap(), r#"{"likes":1}"#);
        assert!(manager.get(&id).is_none());
        assert!(matches!(manager.rollback(&id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_confirmed_updates_cannot_roll_back() {
        let mut manager = OptimisticUpdateManager::new();
        let id = manager.apply(EntityType::User, "u1", "{}", r#"{"following":true}"#, 10);

        manager.confirm(&id, 20).unwrap();
        manager.confirm(&id, 30).unwrap();
        let update = manager.get(&id).unwrap();
        assert!(update.is_confirmed);
        assert_eq!(update.confirmed_at, Some(20));

        assert!(matches!(manager.rollback(&id), Err(Error::NotFound(_))));
        assert_eq!(manager.prune_confirmed(), 1);
        assert!(manager.get(&id).is_none());
    }

    #[test]
    fn test_unknown_ids_are_not_found() {
        let mut manager = OptimisticUpdateManager::new();
        let ghost = UpdateId::from("ghost");
        assert!(matches!(manager.confirm(&ghost, 1), Err(Error::NotFound(_))));
        assert!(matches!(manager.rollback(&ghost), Err(Error::NotFound(_))));
        assert!(manager.bind(&ghost, ActionId::from("1")).is_err());
    }

    #[test]
    fn test_apply_value_serializes_snapshots() {
        let mut manager = OptimisticUpdateManager::new();
        let id = manager
            .apply_value(
                EntityType::Topic,
                "t1",
                &json!({ "joined": false }),
                &json!({ "joined": true }),
                5,
            )
            .unwrap();
        manager.bind(&id, ActionId::from("a1")).unwrap();

        assert_eq!(manager.update_for_action(&ActionId::from("a1")), Some(&id));
        assert_eq!(manager.unconfirmed().len(), 1);
        assert_eq!(manager.rollback(&id).unwrap(), r#"{"joined":false}"#);
        assert!(manager.update_for_action(&ActionId::from("a1")).is_none());
    }
}
