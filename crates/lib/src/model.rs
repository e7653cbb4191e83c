//! Chat data model: users, messages, reply snapshots, and the deterministic
//! private-conversation identifier.
//!
//! Identifiers are provider-issued opaque strings. Messages are never edited
//! or hard-deleted; the only mutation after creation is the soft-delete flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque account identifier issued by the auth provider.
pub type UserId = String;

/// Opaque message identifier issued by the document store.
pub type MessageId = String;

/// Placeholder body shown to the author of a soft-deleted message.
pub const DELETED_BY_VIEWER: &str = "You deleted this message";

/// Placeholder body shown to everyone else.
pub const DELETED_BY_OTHER: &str = "This message was deleted";

/// The signed-in account as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl AuthUser {
    /// Name to attach to outgoing messages: display name, falling back to the
    /// account email when no display name is set.
    pub fn sender_name(&self) -> &str {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.email)
    }
}

/// One document in the `users` collection. Created at signup, updated via
/// profile upsert, never deleted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl UserProfile {
    /// Status line for the roster; absent status reads as "Online".
    pub fn display_status(&self) -> &str {
        self.status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("Online")
    }
}

/// Copy of a prior message staged as a reply target. A snapshot, not a live
/// link: edits or deletes to the original never propagate here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplySnapshot {
    pub message_id: MessageId,
    pub sender_name: String,
    pub text: String,
}

impl ReplySnapshot {
    /// Snapshot `message` as a reply target, copying its current body.
    pub fn of(message: &Message) -> Self {
        Self {
            message_id: message.id.clone(),
            sender_name: message.sender_name.clone(),
            text: message.text.clone(),
        }
    }
}

/// One message in the shared room or a private conversation.
///
/// `created_at` is server-assigned and non-decreasing per collection; it is
/// `None` for a write the server has not timestamped yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplySnapshot>,
}

impl Message {
    /// Body to render for `viewer_uid`. A soft-deleted message keeps its id,
    /// position, and metadata, but its body is always one of the placeholders.
    pub fn display_body(&self, viewer_uid: &str) -> &str {
        if !self.deleted {
            &self.text
        } else if self.sender_id == viewer_uid {
            DELETED_BY_VIEWER
        } else {
            DELETED_BY_OTHER
        }
    }

    pub fn is_from(&self, uid: &str) -> bool {
        self.sender_id == uid
    }
}

/// Identifier of a two-party private conversation.
///
/// A pure function of the participant uids (lexicographic order joined with
/// `_`), so both sides address the same conversation without a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn between(a: &str, b: &str) -> Self {
        if a <= b {
            Self(format!("{}_{}", a, b))
        } else {
            Self(format!("{}_{}", b, a))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which message collection a view is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageScope {
    /// The shared room (flat `messages` collection).
    Room,
    /// A per-pair sub-collection under `privateChats`.
    Private(ConversationId),
}

impl MessageScope {
    /// Collection path for this scope, as laid out in the document store.
    pub fn collection_path(&self) -> String {
        match self {
            MessageScope::Room => "messages".to_string(),
            MessageScope::Private(id) => format!("privateChats/{}/messages", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(id: &str, sender: &str, text: &str) -> Message {
        Message {
            id: id.to_string(),
            sender_id: sender.to_string(),
            sender_name: sender.to_string(),
            text: text.to_string(),
            created_at: Some(Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap()),
            deleted: false,
            reply_to: None,
        }
    }

    #[test]
    fn conversation_id_is_commutative() {
        assert_eq!(
            ConversationId::between("alice", "bob"),
            ConversationId::between("bob", "alice")
        );
        assert_eq!(ConversationId::between("alice", "bob").as_str(), "alice_bob");
    }

    #[test]
    fn sender_name_falls_back_to_email() {
        let mut user = AuthUser {
            uid: "u1".to_string(),
            email: "a@example.com".to_string(),
            display_name: None,
        };
        assert_eq!(user.sender_name(), "a@example.com");
        user.display_name = Some("  ".to_string());
        assert_eq!(user.sender_name(), "a@example.com");
        user.display_name = Some("Alice".to_string());
        assert_eq!(user.sender_name(), "Alice");
    }

    #[test]
    fn deleted_body_depends_on_viewer() {
        let mut msg = message("m1", "alice", "hello");
        assert_eq!(msg.display_body("bob"), "hello");
        msg.deleted = true;
        assert_eq!(msg.display_body("alice"), DELETED_BY_VIEWER);
        assert_eq!(msg.display_body("bob"), DELETED_BY_OTHER);
    }

    #[test]
    fn reply_snapshot_does_not_follow_the_original() {
        let mut msg = message("m1", "alice", "original text");
        let reply = ReplySnapshot::of(&msg);
        msg.deleted = true;
        msg.text = "mutated".to_string();
        assert_eq!(reply.text, "original text");
        assert_eq!(reply.message_id, "m1");
    }

    #[test]
    fn scope_paths() {
        assert_eq!(MessageScope::Room.collection_path(), "messages");
        let scope = MessageScope::Private(ConversationId::between("b", "a"));
        assert_eq!(scope.collection_path(), "privateChats/a_b/messages");
    }
}
