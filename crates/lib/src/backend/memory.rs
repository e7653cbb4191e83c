//! In-memory backend: both services in one process.
//!
//! Backs the test suite and the CLI's offline demo mode. Ids and timestamps
//! are "server"-assigned here, with timestamps clamped so each collection
//! stays non-decreasing.

use crate::backend::service::{AuthBackend, AuthError, AuthState, ChatBackend, Draft, StoreError};
use crate::model::{AuthUser, ConversationId, Message, MessageId, MessageScope, UserProfile};
use crate::subscription::{self, Publisher, Subscription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

struct Account {
    uid: String,
    password: String,
    display_name: String,
    email: String,
}

/// One message collection plus its long-lived snapshot publisher.
struct ScopeState {
    messages: Vec<Message>,
    publisher: Publisher<Vec<Message>>,
    last_ts: Option<DateTime<Utc>>,
}

impl ScopeState {
    fn new() -> Self {
        // The publisher is store-owned and outlives individual views; it
        // keeps working while no subscription is attached.
        let (publisher, _initial) = subscription::channel(Vec::new());
        Self {
            messages: Vec::new(),
            publisher,
            last_ts: None,
        }
    }

    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_ts {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_ts = Some(ts);
        ts
    }
}

/// In-process implementation of [`AuthBackend`] and [`ChatBackend`].
pub struct MemoryBackend {
    accounts: RwLock<HashMap<String, Account>>,
    current: Publisher<AuthState>,
    users: RwLock<HashMap<String, UserProfile>>,
    scopes: RwLock<HashMap<String, ScopeState>>,
    markers: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        // No persisted session to resolve, so the stream starts SignedOut.
        let (current, _initial) = subscription::channel(AuthState::SignedOut);
        Self {
            accounts: RwLock::new(HashMap::new()),
            current,
            users: RwLock::new(HashMap::new()),
            scopes: RwLock::new(HashMap::new()),
            markers: RwLock::new(HashMap::new()),
        }
    }

    fn marker_key(conversation: &ConversationId, uid: &str) -> String {
        format!("{}/{}", conversation, uid)
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AuthUser, AuthError> {
        let email = email.trim().to_lowercase();
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&email) {
            return Err(AuthError::Rejected(format!(
                "an account already exists for {}",
                email
            )));
        }
        let uid = format!("user-{}", uuid::Uuid::new_v4());
        accounts.insert(
            email.clone(),
            Account {
                uid: uid.clone(),
                password: password.to_string(),
                display_name: display_name.to_string(),
                email: email.clone(),
            },
        );
        let user = AuthUser {
            uid,
            email,
            display_name: Some(display_name.to_string()),
        };
        self.current.publish(AuthState::SignedIn(user.clone()));
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = email.trim().to_lowercase();
        let accounts = self.accounts.read().await;
        let account = accounts
            .get(&email)
            .filter(|a| a.password == password)
            .ok_or_else(|| AuthError::Rejected("invalid email or password".to_string()))?;
        let user = AuthUser {
            uid: account.uid.clone(),
            email: account.email.clone(),
            display_name: Some(account.display_name.clone()).filter(|s| !s.is_empty()),
        };
        self.current.publish(AuthState::SignedIn(user.clone()));
        Ok(user)
    }

    async fn sign_out(&self) {
        self.current.publish(AuthState::SignedOut);
    }

    async fn watch_user(&self) -> Subscription<AuthState> {
        self.current.subscribe()
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn send_message(
        &self,
        scope: &MessageScope,
        draft: Draft,
    ) -> Result<MessageId, StoreError> {
        let mut scopes = self.scopes.write().await;
        let state = scopes
            .entry(scope.collection_path())
            .or_insert_with(ScopeState::new);
        let id = format!("msg-{}", uuid::Uuid::new_v4());
        let message = Message {
            id: id.clone(),
            sender_id: draft.sender_id,
            sender_name: draft.sender_name,
            text: draft.text,
            created_at: Some(state.next_timestamp()),
            deleted: false,
            reply_to: draft.reply_to,
        };
        state.messages.push(message);
        state.publisher.publish(state.messages.clone());
        Ok(id)
    }

    async fn mark_deleted(&self, scope: &MessageScope, id: &str) -> Result<(), StoreError> {
        let mut scopes = self.scopes.write().await;
        let state = scopes
            .get_mut(&scope.collection_path())
            .ok_or_else(|| StoreError::NotFound(format!("no such collection: {:?}", scope)))?;
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("no such message: {}", id)))?;
        message.deleted = true;
        state.publisher.publish(state.messages.clone());
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, StoreError> {
        let users = self.users.read().await;
        let mut roster: Vec<UserProfile> = users.values().cloned().collect();
        roster.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(roster)
    }

    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.users
            .write()
            .await
            .insert(profile.uid.clone(), profile.clone());
        Ok(())
    }

    async fn read_marker(
        &self,
        conversation: &ConversationId,
        uid: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let markers = self.markers.read().await;
        Ok(markers.get(&Self::marker_key(conversation, uid)).copied())
    }

    async fn set_read_marker(
        &self,
        conversation: &ConversationId,
        uid: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.markers
            .write()
            .await
            .insert(Self::marker_key(conversation, uid), at);
        Ok(())
    }

    async fn subscribe_messages(&self, scope: &MessageScope) -> Subscription<Vec<Message>> {
        let mut scopes = self.scopes.write().await;
        let state = scopes
            .entry(scope.collection_path())
            .or_insert_with(ScopeState::new);
        // The publisher's current value is always the latest snapshot, so a
        // fresh subscription starts from the current contents.
        state.publisher.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(uid: &str, text: &str) -> Draft {
        Draft {
            sender_id: uid.to_string(),
            sender_name: uid.to_string(),
            text: text.to_string(),
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn duplicate_signup_is_rejected() {
        let backend = MemoryBackend::new();
        backend.sign_up("a@example.com", "pw", "Alice").await.unwrap();
        let err = backend.sign_up("a@example.com", "pw2", "Alice2").await;
        assert!(matches!(err, Err(AuthError::Rejected(_))));
    }

    #[tokio::test]
    async fn sign_in_round_trip_and_bad_password() {
        let backend = MemoryBackend::new();
        let created = backend.sign_up("a@example.com", "pw", "Alice").await.unwrap();
        let signed_in = backend.sign_in("A@Example.com", "pw").await.unwrap();
        assert_eq!(created.uid, signed_in.uid);
        assert_eq!(signed_in.sender_name(), "Alice");
        assert!(backend.sign_in("a@example.com", "nope").await.is_err());
    }

    #[tokio::test]
    async fn auth_stream_follows_sign_in_and_out() {
        let backend = MemoryBackend::new();
        let sub = backend.watch_user().await;
        assert_eq!(sub.latest(), AuthState::SignedOut);
        let user = backend.sign_up("a@example.com", "pw", "Alice").await.unwrap();
        assert_eq!(sub.latest(), AuthState::SignedIn(user));
        backend.sign_out().await;
        assert_eq!(sub.latest(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn send_assigns_id_and_non_decreasing_timestamps() {
        let backend = MemoryBackend::new();
        let scope = MessageScope::Room;
        backend.send_message(&scope, draft("u1", "one")).await.unwrap();
        backend.send_message(&scope, draft("u1", "two")).await.unwrap();
        let sub = backend.subscribe_messages(&scope).await;
        let messages = sub.latest();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].created_at.unwrap() <= messages[1].created_at.unwrap());
        assert_ne!(messages[0].id, messages[1].id);
    }

    #[tokio::test]
    async fn mark_deleted_flips_the_flag_in_place() {
        let backend = MemoryBackend::new();
        let scope = MessageScope::Room;
        let id = backend.send_message(&scope, draft("u1", "one")).await.unwrap();
        backend.send_message(&scope, draft("u1", "two")).await.unwrap();
        backend.mark_deleted(&scope, &id).await.unwrap();
        let messages = backend.subscribe_messages(&scope).await.latest();
        assert_eq!(messages[0].id, id);
        assert!(messages[0].deleted);
        assert_eq!(messages[0].text, "one");
        assert!(!messages[1].deleted);
        assert!(matches!(
            backend.mark_deleted(&scope, "msg-missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn subscriptions_see_live_updates() {
        let backend = MemoryBackend::new();
        let scope = MessageScope::Room;
        let mut sub = backend.subscribe_messages(&scope).await;
        assert!(sub.latest().is_empty());
        backend.send_message(&scope, draft("u1", "hello")).await.unwrap();
        assert!(sub.changed().await);
        assert_eq!(sub.latest().len(), 1);
    }

    #[tokio::test]
    async fn read_markers_upsert_per_conversation_and_user() {
        let backend = MemoryBackend::new();
        let conv = ConversationId::between("a", "b");
        assert_eq!(backend.read_marker(&conv, "a").await.unwrap(), None);
        let at = Utc::now();
        backend.set_read_marker(&conv, "a", at).await.unwrap();
        assert_eq!(backend.read_marker(&conv, "a").await.unwrap(), Some(at));
        assert_eq!(backend.read_marker(&conv, "b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn roster_is_sorted_by_name() {
        let backend = MemoryBackend::new();
        for (uid, name) in [("u1", "charlie"), ("u2", "Alice"), ("u3", "bob")] {
            backend
                .upsert_user(&UserProfile {
                    uid: uid.to_string(),
                    name: name.to_string(),
                    photo_url: None,
                    status: None,
                })
                .await
                .unwrap();
        }
        let names: Vec<String> = backend
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(names, vec!["Alice", "bob", "charlie"]);
    }
}
