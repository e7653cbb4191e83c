//! Chat view state: compose, reply staging, soft delete, and render rows.
//!
//! One state machine serves the shared room and private conversations; the
//! two differ only in scope and in the read-marker upsert when a private
//! conversation opens. Compose state is cleared only after the backend
//! acknowledges a write; a failed write leaves it intact for resubmission
//! (single attempt, no automatic retry).

use crate::backend::{ChatBackend, Draft, StoreError};
use crate::feed::MessageFeed;
use crate::grouping::{self, DayLabel};
use crate::model::{AuthUser, ConversationId, Message, MessageId, MessageScope, ReplySnapshot};
use chrono::{DateTime, NaiveDate, Utc};

/// Result of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Write acknowledged; compose and staged reply were cleared.
    Sent(MessageId),
    /// Empty or whitespace-only input; the backend was not contacted.
    Rejected,
    /// Write failed; compose and staged reply are untouched.
    Failed(String),
}

/// One render-ready line of the message list.
#[derive(Debug, Clone)]
pub struct MessageRow {
    /// Day separator to draw above this message, when the label changes.
    pub separator: Option<DayLabel>,
    pub message: Message,
    /// Body with the soft-delete placeholder already applied for the viewer.
    pub body: String,
    /// True when the viewer authored the message.
    pub outgoing: bool,
}

pub struct ChatView {
    viewer: AuthUser,
    feed: MessageFeed,
    compose: String,
    staged_reply: Option<ReplySnapshot>,
    pending_delete: Option<MessageId>,
    last_error: Option<String>,
}

impl ChatView {
    /// Open the shared room.
    pub async fn open_room(backend: &dyn ChatBackend, viewer: AuthUser) -> Self {
        let feed = MessageFeed::open(backend, MessageScope::Room).await;
        Self::new(viewer, feed)
    }

    /// Open the private conversation with `peer_uid`, upserting the viewer's
    /// read marker at "now" so the unread badge zeroes on next roster open.
    /// A marker write failure is logged, never fatal.
    pub async fn open_private(
        backend: &dyn ChatBackend,
        viewer: AuthUser,
        peer_uid: &str,
    ) -> Result<Self, StoreError> {
        if peer_uid == viewer.uid {
            return Err(StoreError::Rejected(
                "cannot open a conversation with yourself".to_string(),
            ));
        }
        let conversation = ConversationId::between(&viewer.uid, peer_uid);
        if let Err(e) = backend
            .set_read_marker(&conversation, &viewer.uid, Utc::now())
            .await
        {
            log::error!("failed to update read marker for {}: {}", conversation, e);
        }
        let feed = MessageFeed::open(backend, MessageScope::Private(conversation)).await;
        Ok(Self::new(viewer, feed))
    }

    fn new(viewer: AuthUser, feed: MessageFeed) -> Self {
        Self {
            viewer,
            feed,
            compose: String::new(),
            staged_reply: None,
            pending_delete: None,
            last_error: None,
        }
    }

    pub fn viewer(&self) -> &AuthUser {
        &self.viewer
    }

    pub fn scope(&self) -> &MessageScope {
        self.feed.scope()
    }

    /// The other side's conversation id, for private scopes.
    pub fn conversation(&self) -> Option<&ConversationId> {
        match self.feed.scope() {
            MessageScope::Private(id) => Some(id),
            MessageScope::Room => None,
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.feed.messages()
    }

    /// Wait for the next snapshot from the live query.
    pub async fn changed(&mut self) -> bool {
        self.feed.changed().await
    }

    pub fn compose(&self) -> &str {
        &self.compose
    }

    pub fn compose_mut(&mut self) -> &mut String {
        &mut self.compose
    }

    pub fn set_compose(&mut self, text: impl Into<String>) {
        self.compose = text.into();
    }

    /// Stage `message` as the reply target. Soft-deleted messages cannot be
    /// replied to.
    pub fn stage_reply(&mut self, message: &Message) {
        if !message.deleted {
            self.staged_reply = Some(ReplySnapshot::of(message));
        }
    }

    pub fn staged_reply(&self) -> Option<&ReplySnapshot> {
        self.staged_reply.as_ref()
    }

    pub fn clear_reply(&mut self) {
        self.staged_reply = None;
    }

    /// Validate the compose input and build the outgoing draft. Returns
    /// `None` for empty-or-whitespace input, without contacting the backend.
    /// Compose state is untouched here; it clears only when
    /// [`complete_send`](Self::complete_send) sees the acknowledgment.
    pub fn prepare_send(&mut self) -> Option<Draft> {
        if self.compose.trim().is_empty() {
            return None;
        }
        let mut draft = Draft::new(&self.viewer, self.compose.clone());
        draft.reply_to = self.staged_reply.clone();
        Some(draft)
    }

    /// Fold a send result back into the view.
    pub fn complete_send(&mut self, result: Result<MessageId, StoreError>) -> SendOutcome {
        match result {
            Ok(id) => {
                self.compose.clear();
                self.staged_reply = None;
                self.last_error = None;
                SendOutcome::Sent(id)
            }
            Err(e) => {
                log::error!("failed to send message: {}", e);
                self.last_error = Some(e.to_string());
                SendOutcome::Failed(e.to_string())
            }
        }
    }

    /// One full send attempt. Overlapping calls are allowed; nothing queues
    /// or de-duplicates, so a rapid double-submit can write twice.
    pub async fn send(&mut self, backend: &dyn ChatBackend) -> SendOutcome {
        let Some(draft) = self.prepare_send() else {
            return SendOutcome::Rejected;
        };
        let result = backend.send_message(self.feed.scope(), draft).await;
        self.complete_send(result)
    }

    /// Stage a soft delete for confirmation. Only the author of a non-deleted
    /// message may request it; returns whether the request was staged.
    pub fn request_delete(&mut self, id: &str) -> bool {
        let allowed = self
            .feed
            .messages()
            .iter()
            .any(|m| m.id == id && m.is_from(&self.viewer.uid) && !m.deleted);
        if allowed {
            self.pending_delete = Some(id.to_string());
        }
        allowed
    }

    /// The message whose deletion is awaiting confirmation.
    pub fn pending_delete(&self) -> Option<Message> {
        let id = self.pending_delete.as_ref()?;
        self.feed.messages().into_iter().find(|m| &m.id == id)
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
    }

    /// Consume the confirmed delete request, for callers that dispatch the
    /// backend write themselves.
    pub fn take_delete_request(&mut self) -> Option<MessageId> {
        self.pending_delete.take()
    }

    /// Confirm the staged delete and flip the flag on the backend. A failed
    /// write is logged and recorded; there is no retry.
    pub async fn confirm_delete(&mut self, backend: &dyn ChatBackend) -> bool {
        let Some(id) = self.pending_delete.take() else {
            return false;
        };
        match backend.mark_deleted(self.feed.scope(), &id).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("failed to delete message {}: {}", id, e);
                self.last_error = Some(e.to_string());
                false
            }
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Assemble render rows: day separators plus viewer-dependent bodies.
    /// Recomputed from the full snapshot on every call.
    pub fn rows<F>(&self, today: NaiveDate, day_of: F) -> Vec<MessageRow>
    where
        F: Fn(DateTime<Utc>) -> NaiveDate,
    {
        let messages = self.feed.messages();
        let separators = grouping::date_separators(&messages, today, day_of);
        messages
            .into_iter()
            .zip(separators)
            .map(|(message, separator)| MessageRow {
                separator,
                body: message.display_body(&self.viewer.uid).to_string(),
                outgoing: message.is_from(&self.viewer.uid),
                message,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AuthBackend, MemoryBackend};
    use crate::members::count_unread;
    use crate::model::{DELETED_BY_OTHER, DELETED_BY_VIEWER};
    use async_trait::async_trait;
    use chrono::TimeZone;

    async fn user(backend: &MemoryBackend, email: &str, name: &str) -> AuthUser {
        backend.sign_up(email, "pw", name).await.unwrap()
    }

    /// Store double whose writes always fail, for the keep-compose contract.
    struct FailingStore;

    #[async_trait]
    impl ChatBackend for FailingStore {
        async fn send_message(
            &self,
            _scope: &MessageScope,
            _draft: Draft,
        ) -> Result<MessageId, StoreError> {
            Err(StoreError::Transport("connection reset".to_string()))
        }

        async fn mark_deleted(&self, _scope: &MessageScope, _id: &str) -> Result<(), StoreError> {
            Err(StoreError::Transport("connection reset".to_string()))
        }

        async fn list_users(&self) -> Result<Vec<crate::model::UserProfile>, StoreError> {
            Ok(Vec::new())
        }

        async fn upsert_user(&self, _profile: &crate::model::UserProfile) -> Result<(), StoreError> {
            Ok(())
        }

        async fn read_marker(
            &self,
            _conversation: &ConversationId,
            _uid: &str,
        ) -> Result<Option<DateTime<Utc>>, StoreError> {
            Ok(None)
        }

        async fn set_read_marker(
            &self,
            _conversation: &ConversationId,
            _uid: &str,
            _at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            Err(StoreError::Transport("connection reset".to_string()))
        }

        async fn subscribe_messages(
            &self,
            _scope: &MessageScope,
        ) -> crate::subscription::Subscription<Vec<Message>> {
            let (_publisher, sub) = crate::subscription::channel(Vec::new());
            sub
        }
    }

    #[tokio::test]
    async fn whitespace_only_send_is_rejected_without_a_write() {
        let backend = MemoryBackend::new();
        let alice = user(&backend, "a@example.com", "Alice").await;
        let mut view = ChatView::open_room(&backend, alice).await;
        view.set_compose("   ");
        assert_eq!(view.send(&backend).await, SendOutcome::Rejected);
        assert!(view.messages().is_empty());
        assert_eq!(view.compose(), "   ");
    }

    #[tokio::test]
    async fn acknowledged_send_clears_compose_and_reply() {
        let backend = MemoryBackend::new();
        let alice = user(&backend, "a@example.com", "Alice").await;
        let mut view = ChatView::open_room(&backend, alice).await;

        view.set_compose("hello");
        let outcome = view.send(&backend).await;
        assert!(matches!(outcome, SendOutcome::Sent(_)));
        assert_eq!(view.compose(), "");

        let first = view.messages()[0].clone();
        view.stage_reply(&first);
        view.set_compose("replying");
        assert!(matches!(view.send(&backend).await, SendOutcome::Sent(_)));
        assert!(view.staged_reply().is_none());

        let reply = &view.messages()[1];
        let snapshot = reply.reply_to.as_ref().unwrap();
        assert_eq!(snapshot.message_id, first.id);
        assert_eq!(snapshot.text, "hello");
    }

    #[tokio::test]
    async fn failed_send_keeps_compose_and_reply_for_resubmission() {
        let backend = MemoryBackend::new();
        let alice = user(&backend, "a@example.com", "Alice").await;
        let mut view = ChatView::open_room(&backend, alice).await;
        backend
            .send_message(&MessageScope::Room, Draft::new(view.viewer(), "earlier"))
            .await
            .unwrap();
        let earlier = view.messages()[0].clone();

        view.stage_reply(&earlier);
        view.set_compose("will fail");
        let outcome = view.send(&FailingStore).await;
        assert!(matches!(outcome, SendOutcome::Failed(_)));
        assert_eq!(view.compose(), "will fail");
        assert!(view.staged_reply().is_some());
        assert!(view.last_error().unwrap().contains("connection reset"));

        // Resubmitting against a healthy backend succeeds and clears state.
        assert!(matches!(view.send(&backend).await, SendOutcome::Sent(_)));
        assert_eq!(view.compose(), "");
        assert!(view.last_error().is_none());
    }

    #[tokio::test]
    async fn only_the_author_may_stage_a_delete_and_confirmation_is_required() {
        let backend = MemoryBackend::new();
        let alice = user(&backend, "a@example.com", "Alice").await;
        let bob = user(&backend, "b@example.com", "Bob").await;

        let mut alice_view = ChatView::open_room(&backend, alice.clone()).await;
        alice_view.set_compose("mine");
        alice_view.send(&backend).await;
        let id = alice_view.messages()[0].id.clone();

        let mut bob_view = ChatView::open_room(&backend, bob.clone()).await;
        assert!(!bob_view.request_delete(&id));

        assert!(alice_view.request_delete(&id));
        alice_view.cancel_delete();
        assert!(!alice_view.messages()[0].deleted);

        assert!(alice_view.request_delete(&id));
        assert!(alice_view.confirm_delete(&backend).await);
        let deleted = &alice_view.messages()[0];
        assert!(deleted.deleted);
        assert_eq!(deleted.id, id);
        assert_eq!(deleted.display_body(&alice.uid), DELETED_BY_VIEWER);
        assert_eq!(deleted.display_body(&bob.uid), DELETED_BY_OTHER);
        // A deleted message is no longer deletable or replyable.
        assert!(!alice_view.request_delete(&id));
        alice_view.stage_reply(deleted);
        assert!(alice_view.staged_reply().is_none());
    }

    #[tokio::test]
    async fn rows_carry_separators_placeholders_and_direction() {
        let backend = MemoryBackend::new();
        let alice = user(&backend, "a@example.com", "Alice").await;
        let bob = user(&backend, "b@example.com", "Bob").await;

        let mut view = ChatView::open_room(&backend, alice.clone()).await;
        view.set_compose("from alice");
        view.send(&backend).await;
        backend
            .send_message(
                &MessageScope::Room,
                Draft::new(&bob, "from bob"),
            )
            .await
            .unwrap();

        let today = Utc::now().date_naive();
        let rows = view.rows(today, |ts| ts.date_naive());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].separator, Some(DayLabel::Today));
        assert_eq!(rows[1].separator, None);
        assert!(rows[0].outgoing);
        assert!(!rows[1].outgoing);
        assert_eq!(rows[1].body, "from bob");
    }

    #[tokio::test]
    async fn opening_a_private_chat_zeroes_unread() {
        let backend = MemoryBackend::new();
        let alice = user(&backend, "a@example.com", "Alice").await;
        let bob = user(&backend, "b@example.com", "Bob").await;
        let conversation = ConversationId::between(&alice.uid, &bob.uid);
        let scope = MessageScope::Private(conversation.clone());
        backend
            .send_message(&scope, Draft::new(&bob, "unseen"))
            .await
            .unwrap();

        let view = ChatView::open_private(&backend, alice.clone(), &bob.uid)
            .await
            .unwrap();
        assert_eq!(view.conversation(), Some(&conversation));

        let marker = backend
            .read_marker(&conversation, &alice.uid)
            .await
            .unwrap();
        assert!(marker.is_some());
        assert_eq!(count_unread(&view.messages(), &alice.uid, marker), 0);
    }

    #[tokio::test]
    async fn self_conversation_is_rejected() {
        let backend = MemoryBackend::new();
        let alice = user(&backend, "a@example.com", "Alice").await;
        let result = ChatView::open_private(&backend, alice.clone(), &alice.uid).await;
        assert!(matches!(result, Err(StoreError::Rejected(_))));
    }

    #[tokio::test]
    async fn marker_write_failure_still_opens_the_conversation() {
        let backend = MemoryBackend::new();
        let alice = user(&backend, "a@example.com", "Alice").await;
        let view = ChatView::open_private(&FailingStore, alice, "bob-uid").await;
        assert!(view.is_ok());
    }

    #[tokio::test]
    async fn rows_are_stateless_across_renders() {
        let backend = MemoryBackend::new();
        let alice = user(&backend, "a@example.com", "Alice").await;
        let view = ChatView::open_room(&backend, alice).await;
        // Stateless across renders: identical input yields identical rows.
        let today = Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap().date_naive();
        let a = view.rows(today, |ts| ts.date_naive());
        let b = view.rows(today, |ts| ts.date_naive());
        assert_eq!(a.len(), b.len());
    }
}
