//! Optimistic update model

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::EntityType;

/// Opaque identity of an optimistic update
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateId(String);

impl UpdateId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UpdateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UpdateId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A tentative local mutation awaiting confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisticUpdate {
    pub update_id: UpdateId,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Serialized snapshot before the mutation; kept until confirmed
    pub original_data: String,
    /// Serialized snapshot after the mutation
    pub updated_data: String,
    pub is_confirmed: bool,
    /// Unix ms
    pub created_at: i64,
    /// Unix ms
    pub confirmed_at: Option<i64>,
}
