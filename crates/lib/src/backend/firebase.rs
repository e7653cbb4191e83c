//! Firebase-backed implementation of the service traits.
//!
//! Auth goes through the identitytoolkit REST endpoints; documents live in
//! Firestore. Live queries are interval polls that publish full snapshots and
//! stop as soon as their subscription is dropped.

use crate::backend::service::{AuthBackend, AuthError, AuthState, ChatBackend, Draft, StoreError};
use crate::config::{self, Config};
use crate::model::{AuthUser, ConversationId, Message, MessageId, MessageScope, ReplySnapshot, UserProfile};
use crate::subscription::{self, Subscription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use firebase_backend::{AuthApiError, AuthClient, FirestoreClient, FirestoreError, FsDocument, FsValue};
use std::collections::HashMap;
use std::time::Duration;

/// Both services backed by one Firebase project.
pub struct FirebaseBackend {
    auth: AuthClient,
    store: FirestoreClient,
    poll_interval: Duration,
    current: subscription::Publisher<AuthState>,
}

impl FirebaseBackend {
    pub fn new(
        project_id: impl Into<String>,
        api_key: impl Into<String>,
        emulator_host: Option<&str>,
        poll_interval: Duration,
    ) -> Self {
        // No persisted session on startup, so the stream resolves SignedOut
        // immediately.
        let (current, _initial) = subscription::channel(AuthState::SignedOut);
        Self {
            auth: AuthClient::new(api_key, emulator_host),
            store: FirestoreClient::new(project_id, emulator_host),
            poll_interval,
            current,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        if !config::has_backend_project(config) {
            anyhow::bail!("no backend project configured (backend.projectId)");
        }
        let api_key = config::resolve_api_key(config)
            .ok_or_else(|| anyhow::anyhow!("no API key configured (backend.apiKey or CHATVERSE_API_KEY)"))?;
        Ok(Self::new(
            config.backend.project_id.trim(),
            api_key,
            config.backend.emulator_host.as_deref(),
            Duration::from_millis(config.backend.poll_interval_ms.max(100)),
        ))
    }
}

fn auth_error(e: AuthApiError) -> AuthError {
    match e {
        AuthApiError::Request(e) => AuthError::Transport(e.to_string()),
        AuthApiError::Api(message) => AuthError::Rejected(message),
    }
}

fn store_error(e: FirestoreError) -> StoreError {
    match e {
        FirestoreError::Request(e) => StoreError::Transport(e.to_string()),
        FirestoreError::Api(message) => StoreError::Rejected(message),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn encode_draft(draft: &Draft) -> HashMap<String, FsValue> {
    let mut fields = HashMap::new();
    fields.insert("text".to_string(), FsValue::string(&draft.text));
    fields.insert("senderId".to_string(), FsValue::string(&draft.sender_id));
    fields.insert("senderName".to_string(), FsValue::string(&draft.sender_name));
    fields.insert("deleted".to_string(), FsValue::boolean(false));
    if let Some(ref reply) = draft.reply_to {
        let mut snapshot = HashMap::new();
        snapshot.insert("messageId".to_string(), FsValue::string(&reply.message_id));
        snapshot.insert("senderName".to_string(), FsValue::string(&reply.sender_name));
        snapshot.insert("text".to_string(), FsValue::string(&reply.text));
        fields.insert("replyTo".to_string(), FsValue::map(snapshot));
    }
    fields
}

fn decode_reply(value: &FsValue) -> Option<ReplySnapshot> {
    let fields = value.as_map()?;
    Some(ReplySnapshot {
        message_id: fields.get("messageId")?.as_str()?.to_string(),
        sender_name: fields.get("senderName")?.as_str()?.to_string(),
        text: fields.get("text")?.as_str()?.to_string(),
    })
}

fn decode_message(doc: &FsDocument) -> Option<Message> {
    Some(Message {
        id: doc.id().to_string(),
        sender_id: doc.field("senderId")?.as_str()?.to_string(),
        sender_name: doc
            .field("senderName")
            .and_then(FsValue::as_str)
            .unwrap_or_default()
            .to_string(),
        text: doc.field("text")?.as_str()?.to_string(),
        created_at: doc.field("createdAt").and_then(FsValue::as_timestamp),
        deleted: doc.field("deleted").and_then(FsValue::as_bool).unwrap_or(false),
        reply_to: doc.field("replyTo").and_then(decode_reply),
    })
}

fn decode_profile(doc: &FsDocument) -> Option<UserProfile> {
    Some(UserProfile {
        uid: doc.id().to_string(),
        name: doc.field("name")?.as_str()?.to_string(),
        photo_url: doc
            .field("photoURL")
            .and_then(FsValue::as_str)
            .map(str::to_string),
        status: doc
            .field("status")
            .and_then(FsValue::as_str)
            .map(str::to_string),
    })
}

fn marker_path(conversation: &ConversationId, uid: &str) -> String {
    format!("privateChats/{}/metadata/{}", conversation, uid)
}

#[async_trait]
impl AuthBackend for FirebaseBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AuthUser, AuthError> {
        let session = self
            .auth
            .sign_up(email.trim(), password)
            .await
            .map_err(auth_error)?;
        if let Err(e) = self
            .auth
            .update_display_name(&session.id_token, display_name)
            .await
        {
            // Account exists; a missing display name only degrades to the
            // email fallback.
            log::error!("failed to set display name: {}", auth_error(e));
        }
        let user = AuthUser {
            uid: session.local_id,
            email: session.email,
            display_name: non_empty(Some(display_name.to_string())),
        };
        self.current.publish(AuthState::SignedIn(user.clone()));
        Ok(user)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let session = self
            .auth
            .sign_in(email.trim(), password)
            .await
            .map_err(auth_error)?;
        let user = AuthUser {
            uid: session.local_id,
            email: session.email,
            display_name: non_empty(session.display_name),
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
impl ChatBackend for FirebaseBackend {
    async fn send_message(
        &self,
        scope: &MessageScope,
        draft: Draft,
    ) -> Result<MessageId, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.store
            .create_with_server_time(
                &scope.collection_path(),
                &id,
                encode_draft(&draft),
                "createdAt",
            )
            .await
            .map_err(store_error)?;
        Ok(id)
    }

    async fn mark_deleted(&self, scope: &MessageScope, id: &str) -> Result<(), StoreError> {
        let mut fields = HashMap::new();
        fields.insert("deleted".to_string(), FsValue::boolean(true));
        self.store
            .patch_document(
                &format!("{}/{}", scope.collection_path(), id),
                fields,
                &["deleted"],
            )
            .await
            .map_err(store_error)
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, StoreError> {
        let docs = self
            .store
            .list_documents("users", None)
            .await
            .map_err(store_error)?;
        let mut roster: Vec<UserProfile> = docs.iter().filter_map(decode_profile).collect();
        roster.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(roster)
    }

    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), FsValue::string(&profile.name));
        let mut mask = vec!["name"];
        if let Some(ref url) = profile.photo_url {
            fields.insert("photoURL".to_string(), FsValue::string(url));
            mask.push("photoURL");
        }
        if let Some(ref status) = profile.status {
            fields.insert("status".to_string(), FsValue::string(status));
            mask.push("status");
        }
        self.store
            .patch_document(&format!("users/{}", profile.uid), fields, &mask)
            .await
            .map_err(store_error)
    }

    async fn read_marker(
        &self,
        conversation: &ConversationId,
        uid: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let doc = self
            .store
            .get_document(&marker_path(conversation, uid))
            .await
            .map_err(store_error)?;
        Ok(doc
            .as_ref()
            .and_then(|d| d.field("lastRead"))
            .and_then(FsValue::as_timestamp))
    }

    async fn set_read_marker(
        &self,
        conversation: &ConversationId,
        uid: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut fields = HashMap::new();
        fields.insert("lastRead".to_string(), FsValue::timestamp(at));
        self.store
            .patch_document(&marker_path(conversation, uid), fields, &["lastRead"])
            .await
            .map_err(store_error)
    }

    async fn subscribe_messages(&self, scope: &MessageScope) -> Subscription<Vec<Message>> {
        let (publisher, sub) = subscription::channel(Vec::new());
        let store = self.store.clone();
        let path = scope.collection_path();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            log::debug!("starting poll loop for {}", path);
            loop {
                match store.list_documents(&path, Some("createdAt")).await {
                    Ok(docs) => {
                        let messages: Vec<Message> =
                            docs.iter().filter_map(decode_message).collect();
                        publisher.publish(messages);
                    }
                    Err(e) => {
                        // Logged and retried on the next tick; slow and
                        // absent responses are indistinguishable here.
                        log::debug!("poll failed for {}: {}", path, e);
                    }
                }
                tokio::select! {
                    _ = publisher.closed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            log::debug!("poll loop for {} released", path);
        });
        sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_encoding_carries_the_reply_snapshot() {
        let draft = Draft {
            sender_id: "u1".to_string(),
            sender_name: "Alice".to_string(),
            text: "hello".to_string(),
            reply_to: Some(ReplySnapshot {
                message_id: "m0".to_string(),
                sender_name: "Bob".to_string(),
                text: "earlier".to_string(),
            }),
        };
        let fields = encode_draft(&draft);
        assert_eq!(fields["text"].as_str(), Some("hello"));
        assert_eq!(fields["deleted"].as_bool(), Some(false));
        let reply = decode_reply(&fields["replyTo"]).unwrap();
        assert_eq!(reply.message_id, "m0");
        assert_eq!(reply.text, "earlier");
    }

    #[test]
    fn message_decoding_survives_a_pending_timestamp() {
        let doc: FsDocument = serde_json::from_str(
            r#"{"name":"projects/p/databases/(default)/documents/messages/m1",
                "fields":{"text":{"stringValue":"hi"},
                          "senderId":{"stringValue":"u1"},
                          "senderName":{"stringValue":"Alice"}}}"#,
        )
        .unwrap();
        let message = decode_message(&doc).unwrap();
        assert_eq!(message.id, "m1");
        assert!(message.created_at.is_none());
        assert!(!message.deleted);
        assert!(message.reply_to.is_none());
    }

    #[test]
    fn profile_decoding_requires_a_name() {
        let doc: FsDocument = serde_json::from_str(
            r#"{"name":"projects/p/databases/(default)/documents/users/u1","fields":{}}"#,
        )
        .unwrap();
        assert!(decode_profile(&doc).is_none());
    }

    #[test]
    fn marker_paths_are_per_conversation_and_user() {
        let conversation = ConversationId::between("b", "a");
        assert_eq!(marker_path(&conversation, "a"), "privateChats/a_b/metadata/a");
    }
}
