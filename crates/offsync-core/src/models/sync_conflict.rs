//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Action, ActionId, ActionPayload};
use crate::error::{Error, Result};

/// How the local intent diverges from the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    /// Only modification times differ
    Timestamp,
    /// An explicit version counter differs
    Version,
    /// Both sides changed and a merged payload is available
    Merge,
}

impl ConflictType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::Version => "version",
            Self::Merge => "merge",
        }
    }
}

/// Caller-chosen outcome for a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Local,
    Remote,
    Merge,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "merge" => Ok(Self::Merge),
            other => Err(Error::InvalidInput(format!("unknown resolution: {other}"))),
        }
    }
}

/// Detected divergence between a local action and the authority's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub local_action: Action,
    /// The authority's version of the entity, when it reported one
    pub remote_action: Option<Action>,
    pub conflict_type: ConflictType,
    /// Merged payload; required before `merge` can be selected
    pub merged_data: Option<ActionPayload>,
    /// Set once the conflict has been resolved
    pub resolution: Option<Resolution>,
}

impl SyncConflict {
    pub const fn new(local_action: Action, conflict_type: ConflictType) -> Self {
        Self {
            local_action,
            remote_action: None,
            conflict_type,
            merged_data: None,
            resolution: None,
        }
    }

    #[must_use]
    pub fn with_remote_action(mut self, remote_action: Option<Action>) -> Self {
        self.remote_action = remote_action;
        self
    }

    /// Attach a merged payload; it must keep the local action's type.
    pub fn with_merged_data(mut self, merged: ActionPayload) -> Result<Self> {
        if merged.action_type() != self.local_action.action_type {
            return Err(Error::InvalidInput(format!(
                "merged payload type {} does not match {}",
                merged.action_type(),
                self.local_action.action_type
            )));
        }
        self.merged_data = Some(merged);
        Ok(self)
    }

    /// Conflicts are keyed by the local action they block
    pub const fn id(&self) -> &ActionId {
        &self.local_action.local_id
    }

    pub const fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Check that `resolution` can be applied to this conflict.
    pub fn check_resolution(&self, resolution: Resolution) -> Result<()> {
        match resolution {
            Resolution::Local => Ok(()),
            Resolution::Remote if self.remote_action.is_none() => {
                Err(Error::InvalidResolution(format!(
                    "conflict {} has no remote action to accept",
                    self.id()
                )))
            }
            Resolution::Merge if self.merged_data.is_none() => {
                Err(Error::InvalidResolution(format!(
                    "conflict {} has no merged data",
                    self.id()
                )))
            }
            Resolution::Remote | Resolution::Merge => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(conflict_type: ConflictType) -> SyncConflict {
        let action = Action::new(
            "npub1",
            ActionPayload::TopicUpdate {
                topic_id: "t1".into(),
                name: Some("local".into()),
                description: None,
            },
        );
        SyncConflict::new(action, conflict_type)
    }

    #[test]
    fn test_remote_requires_remote_action() {
        let conflict = conflict(ConflictType::Version);
        assert!(matches!(
            conflict.check_resolution(Resolution::Remote),
            Err(Error::InvalidResolution(_))
        ));
        assert!(conflict.check_resolution(Resolution::Local).is_ok());
    }

    #[test]
    fn test_merge_requires_merged_data() {
        let conflict = conflict(ConflictType::Merge);
        assert!(matches!(
            conflict.check_resolution(Resolution::Merge),
            Err(Error::InvalidResolution(_))
        ));

        let merged = conflict
            .with_merged_data(ActionPayload::TopicUpdate {
                topic_id: "t1".into(),
                name: Some("merged".into()),
                description: Some("remote".into()),
            })
            .unwrap();
        assert!(merged.check_resolution(Resolution::Merge).is_ok());
    }

    #[test]
    fn test_merged_data_must_match_type() {
        let result = conflict(ConflictType::Merge).with_merged_data(ActionPayload::TopicDelete {
            topic_id: "t1".into(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!(" Remote ".parse::<Resolution>().unwrap(), Resolution::Remote);
        assert!("manual".parse::<Resolution>().is_err());
    }
}
