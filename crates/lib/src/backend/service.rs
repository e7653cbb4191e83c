//! Service traits for the auth provider and the chat document store.

use crate::model::{AuthUser, ConversationId, Message, MessageId, MessageScope, UserProfile};
use crate::subscription::Subscription;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// What the auth provider currently knows about the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthState {
    /// Initial state, before the provider has resolved the session.
    #[default]
    Unknown,
    SignedIn(AuthUser),
    SignedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The provider could not be reached.
    #[error("auth request failed: {0}")]
    Transport(String),
    /// The provider rejected the attempt; the message is shown to the user
    /// verbatim.
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend request failed: {0}")]
    Transport(String),
    #[error("{0}")]
    Rejected(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// An outgoing message before the server assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct Draft {
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub reply_to: Option<crate::model::ReplySnapshot>,
}

impl Draft {
    /// Draft authored by `user`, with the display-name-or-email fallback
    /// already resolved.
    pub fn new(user: &AuthUser, text: impl Into<String>) -> Self {
        Self {
            sender_id: user.uid.clone(),
            sender_name: user.sender_name().to_string(),
            text: text.into(),
            reply_to: None,
        }
    }
}

/// The external authentication provider.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Register a new account and set its display name.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AuthUser, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError>;

    async fn sign_out(&self);

    /// Live single-value stream of the current session. Delivers at most one
    /// `Unknown` → known transition per subscription.
    async fn watch_user(&self) -> Subscription<AuthState>;
}

/// The external realtime document store.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Append a message to `scope`. The server assigns id and timestamp; the
    /// returned id is the write acknowledgment.
    async fn send_message(&self, scope: &MessageScope, draft: Draft)
        -> Result<MessageId, StoreError>;

    /// Flip the soft-delete flag in place. Id, ordering position, and reply
    /// snapshots elsewhere are unaffected.
    async fn mark_deleted(&self, scope: &MessageScope, id: &str) -> Result<(), StoreError>;

    /// One-time fetch of the user roster.
    async fn list_users(&self) -> Result<Vec<UserProfile>, StoreError>;

    /// Create or update a user's roster document.
    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), StoreError>;

    /// The viewer's read marker for a conversation; `None` when never opened.
    async fn read_marker(
        &self,
        conversation: &ConversationId,
        uid: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Upsert the viewer's read marker ("seen everything up to `at`").
    async fn set_read_marker(
        &self,
        conversation: &ConversationId,
        uid: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Live query over `scope`, ascending by creation time. Each delivery is
    /// a consistent snapshot of the whole scope; dropping the subscription
    /// releases the listener.
    async fn subscribe_messages(&self, scope: &MessageScope) -> Subscription<Vec<Message>>;
}
