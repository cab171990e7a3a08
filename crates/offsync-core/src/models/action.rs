//! Action model: a recorded mutation intent awaiting the authority

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Client-generated identity of an action, stable across retries
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Create a new unique action ID using UUID v7 (time-sortable)
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ActionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("action id must not be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for ActionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// How an action reaches the authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Kind of domain entity an action targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Post,
    User,
    Topic,
    TopicMembership,
}

impl EntityType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::User => "user",
            Self::Topic => "topic",
            Self::TopicMembership => "topic_membership",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "post" => Ok(Self::Post),
            "user" => Ok(Self::User),
            "topic" => Ok(Self::Topic),
            "topic_membership" => Ok(Self::TopicMembership),
            other => Err(Error::InvalidInput(format!("unknown entity type: {other}"))),
        }
    }
}

/// Kind of mutation recorded by an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CreatePost,
    DeletePost,
    LikePost,
    Boost,
    Bookmark,
    Unbookmark,
    Follow,
    Unfollow,
    ProfileUpdate,
    JoinTopic,
    LeaveTopic,
    TopicCreate,
    TopicUpdate,
    TopicDelete,
}

impl ActionType {
    pub const ALL: [Self; 14] = [
        Self::CreatePost,
        Self::DeletePost,
        Self::LikePost,
        Self::Boost,
        Self::Bookmark,
        Self::Unbookmark,
        Self::Follow,
        Self::Unfollow,
        Self::ProfileUpdate,
        Self::JoinTopic,
        Self::LeaveTopic,
        Self::TopicCreate,
        Self::TopicUpdate,
        Self::TopicDelete,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatePost => "create_post",
            Self::DeletePost => "delete_post",
            Self::LikePost => "like_post",
            Self::Boost => "boost",
            Self::Bookmark => "bookmark",
            Self::Unbookmark => "unbookmark",
            Self::Follow => "follow",
            Self::Unfollow => "unfollow",
            Self::ProfileUpdate => "profile_update",
            Self::JoinTopic => "join_topic",
            Self::LeaveTopic => "leave_topic",
            Self::TopicCreate => "topic_create",
            Self::TopicUpdate => "topic_update",
            Self::TopicDelete => "topic_delete",
        }
    }

    pub const fn entity_type(self) -> EntityType {
        match self {
            Self::CreatePost
            | Self::DeletePost
            | Self::LikePost
            | Self::Boost
            | Self::Bookmark
            | Self::Unbookmark => EntityType::Post,
            Self::Follow | Self::Unfollow | Self::ProfileUpdate => EntityType::User,
            Self::JoinTopic | Self::LeaveTopic => EntityType::TopicMembership,
            Self::TopicCreate | Self::TopicUpdate | Self::TopicDelete => EntityType::Topic,
        }
    }

    pub const fn operation(self) -> Operation {
        match self {
            Self::CreatePost
            | Self::LikePost
            | Self::Boost
            | Self::Bookmark
            | Self::Follow
            | Self::JoinTopic
            | Self::TopicCreate => Operation::Create,
            Self::ProfileUpdate | Self::TopicUpdate => Operation::Update,
            Self::DeletePost
            | Self::Unbookmark
            | Self::Unfollow
            | Self::LeaveTopic
            | Self::TopicDelete => Operation::Delete,
        }
    }

    /// Whether the authority assigns an identity when accepting this action.
    pub const fn has_remote_identity(self) -> bool {
        matches!(self, Self::CreatePost | Self::TopicCreate)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown action type: {s}")))
    }
}

/// Strongly-typed action payload, keyed by action type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    CreatePost {
        content: String,
        topic_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quoted_post: Option<String>,
    },
    DeletePost {
        post_id: String,
    },
    LikePost {
        post_id: String,
    },
    Boost {
        post_id: String,
    },
    Bookmark {
        post_id: String,
    },
    Unbookmark {
        post_id: String,
    },
    Follow {
        user_id: String,
    },
    Unfollow {
        user_id: String,
    },
    ProfileUpdate {
        user_id: String,
        #[serde(default)]
        fields: serde_json::Map<String, serde_json::Value>,
    },
    JoinTopic {
        topic_id: String,
    },
    LeaveTopic {
        topic_id: String,
    },
    TopicCreate {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    TopicUpdate {
        topic_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    TopicDelete {
        topic_id: String,
    },
}

impl ActionPayload {
    pub const fn action_type(&self) -> ActionType {
        match self {
            Self::CreatePost { .. } => ActionType::CreatePost,
            Self::DeletePost { .. } => ActionType::DeletePost,
            Self::LikePost { .. } => ActionType::LikePost,
            Self::Boost { .. } => ActionType::Boost,
            Self::Bookmark { .. } => ActionType::Bookmark,
            Self::Unbookmark { .. } => ActionType::Unbookmark,
            Self::Follow { .. } => ActionType::Follow,
            Self::Unfollow { .. } => ActionType::Unfollow,
            Self::ProfileUpdate { .. } => ActionType::ProfileUpdate,
            Self::JoinTopic { .. } => ActionType::JoinTopic,
            Self::LeaveTopic { .. } => ActionType::LeaveTopic,
            Self::TopicCreate { .. } => ActionType::TopicCreate,
            Self::TopicUpdate { .. } => ActionType::TopicUpdate,
            Self::TopicDelete { .. } => ActionType::TopicDelete,
        }
    }

    /// Existing entity targeted by the payload.
    ///
    /// Creations return `None`; the entity does not exist until the
    /// authority accepts it.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Self::CreatePost { .. } | Self::TopicCreate { .. } => None,
            Self::DeletePost { post_id }
            | Self::LikePost { post_id }
            | Self::Boost { post_id }
            | Self::Bookmark { post_id }
            | Self::Unbookmark { post_id } => Some(post_id),
            Self::Follow { user_id }
            | Self::Unfollow { user_id }
            | Self::ProfileUpdate { user_id, .. } => Some(user_id),
            Self::JoinTopic { topic_id }
            | Self::LeaveTopic { topic_id }
            | Self::TopicUpdate { topic_id, .. }
            | Self::TopicDelete { topic_id } => Some(topic_id),
        }
    }

    /// Topic the action belongs to, if any
    pub fn topic_id(&self) -> Option<&str> {
        match self {
            Self::CreatePost { topic_id, .. }
            | Self::JoinTopic { topic_id }
            | Self::LeaveTopic { topic_id }
            | Self::TopicUpdate { topic_id, .. }
            | Self::TopicDelete { topic_id } => Some(topic_id),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// A single recorded mutation intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Client-generated identity, immutable for the life of the record
    pub local_id: ActionId,
    /// Identity assigned by the authority once accepted
    pub remote_id: Option<String>,
    /// Identity scope (user) that recorded the action
    pub user_key: String,
    pub action_type: ActionType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub payload: ActionPayload,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    pub is_synced: bool,
    /// Time the authority accepted the action (Unix ms)
    pub synced_at: Option<i64>,
}

impl Action {
    /// Record a new action for `user_key`
    #[must_use]
    pub fn new(user_key: impl Into<String>, payload: ActionPayload) -> Self {
        let local_id = ActionId::new();
        let action_type = payload.action_type();
        let entity_id = payload
            .target_id()
            .map_or_else(|| local_id.to_string(), str::to_string);
        Self {
            local_id,
            remote_id: None,
            user_key: user_key.into(),
            action_type,
            entity_type: action_type.entity_type(),
            entity_id,
            payload,
            created_at: chrono::Utc::now().timestamp_millis(),
            is_synced: false,
            synced_at: None,
        }
    }

    /// Replace the generated identity (used when re-hydrating or in fixtures)
    #[must_use]
    pub fn with_local_id(mut self, local_id: impl Into<ActionId>) -> Self {
        let previous = std::mem::replace(&mut self.local_id, local_id.into());
        if self.payload.target_id().is_none() && self.entity_id == previous.as_str() {
            self.entity_id = self.local_id.to_string();
        }
        self
    }

    #[must_use]
    pub const fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Copy of this action carrying a different payload of the same type
    pub fn with_payload(&self, payload: ActionPayload) -> Result<Self> {
        if payload.action_type() != self.action_type {
            return Err(Error::InvalidInput(format!(
                "payload type {} does not match action type {}",
                payload.action_type(),
                self.action_type
            )));
        }
        Ok(Self {
            payload,
            ..self.clone()
        })
    }

    /// Mark the action as accepted by the authority.
    ///
    /// Actions whose type receives a remote identity cannot be marked synced
    /// without one.
    pub fn mark_synced(&mut self, remote_id: Option<String>, synced_at: i64) -> Result<()> {
        let remote_id = remote_id.or_else(|| self.remote_id.clone());
        if self.action_type.has_remote_identity() && remote_id.is_none() {
            return Err(Error::InvalidState(format!(
                "{} action {} accepted without a remote id",
                self.action_type, self.local_id
            )));
        }
        self.remote_id = remote_id;
        self.is_synced = true;
        self.synced_at = Some(synced_at);
        Ok(())
    }

    /// `entity_type/entity_id` label used in logs and errors
    pub fn entity_key(&self) -> String {
        format!("{}/{}", self.entity_type, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn like(post_id: &str) -> ActionPayload {
        ActionPayload::LikePost {
            post_id: post_id.to_string(),
        }
    }

    #[test]
    fn test_action_id_unique() {
        assert_ne!(ActionId::new(), ActionId::new());
    }

    #[test]
    fn test_action_id_rejects_blank() {
        assert!("  ".parse::<ActionId>().is_err());
        assert_eq!("abc".parse::<ActionId>().unwrap().as_str(), "abc");
    }

    #[test]
    fn test_new_action_derives_type_and_entity() {
        let action = Action::new("npub1", like("post-9"));
        assert_eq!(action.action_type, ActionType::LikePost);
        assert_eq!(action.entity_type, EntityType::Post);
        assert_eq!(action.entity_id, "post-9");
        assert!(!action.is_synced);
        assert!(action.created_at > 0);
    }

    #[test]
    fn test_create_action_uses_local_id_as_entity() {
        let action = Action::new(
            "npub1",
            ActionPayload::CreatePost {
                content: "hello".into(),
                topic_id: "rust".into(),
                reply_to: None,
                quoted_post: None,
            },
        )
        .with_local_id("1");
        assert_eq!(action.entity_id, "1");
        assert_eq!(action.payload.topic_id(), Some("rust"));
    }

    #[test]
    fn test_payload_is_tagged_by_type() {
        let json = like("p1").to_json().unwrap();
        assert_eq!(json, r#"{"type":"like_post","post_id":"p1"}"#);
        assert_eq!(ActionPayload::from_json(&json).unwrap(), like("p1"));
    }

    #[test]
    fn test_action_type_parse_covers_all() {
        for kind in ActionType::ALL {
            assert_eq!(kind.as_str().parse::<ActionType>().unwrap(), kind);
        }
        assert!("unknown".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_mark_synced_requires_remote_id_for_creations() {
        let mut create = Action::new(
            "npub1",
            ActionPayload::TopicCreate {
                name: "rust".into(),
                description: None,
            },
        );
        assert!(create.mark_synced(None, 10).is_err());
        assert!(!create.is_synced);

        create.mark_synced(Some("remote-1".into()), 10).unwrap();
        assert!(create.is_synced);
        assert_eq!(create.remote_id.as_deref(), Some("remote-1"));
        assert_eq!(create.synced_at, Some(10));

        let mut delete = Action::new(
            "npub1",
            ActionPayload::DeletePost {
                post_id: "p1".into(),
            },
        );
        delete.mark_synced(None, 11).unwrap();
        assert!(delete.is_synced);
    }

    #[test]
    fn test_with_payload_rejects_other_types() {
        let action = Action::new("npub1", like("p1"));
        assert!(action.with_payload(like("p2")).is_ok());
        assert!(action
            .with_payload(ActionPayload::Boost {
                post_id: "p1".into()
            })
            .is_err());
    }
}
