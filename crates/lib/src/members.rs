//! Members roster and per-user unread badges.
//!
//! For every other known user the panel derives the shared conversation id,
//! subscribes to that conversation, and recounts unread messages from scratch
//! on every snapshot (full recount, fine at this scale). Counts arrive from
//! background watcher tasks and are drained with [`MembersPanel::poll_counts`]
//! once per frame. Watchers are torn down when the panel drops.

use crate::backend::{ChatBackend, StoreError};
use crate::model::{AuthUser, ConversationId, Message, MessageScope, UserId, UserProfile};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Messages from the other party created strictly after the viewer's read
/// marker. A missing marker means "never opened" (epoch); a message the
/// server has not timestamped yet is not counted.
pub fn count_unread(
    messages: &[Message],
    viewer_uid: &str,
    last_read: Option<DateTime<Utc>>,
) -> usize {
    messages
        .iter()
        .filter(|m| m.sender_id != viewer_uid)
        .filter(|m| match (m.created_at, last_read) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(ts), Some(marker)) => ts > marker,
        })
        .count()
}

/// Case-insensitive substring filter on display names. A pure view-layer
/// projection; the roster itself is never mutated.
pub fn filter_members<'a>(members: &'a [UserProfile], query: &str) -> Vec<&'a UserProfile> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return members.iter().collect();
    }
    members
        .iter()
        .filter(|m| m.name.to_lowercase().contains(&query))
        .collect()
}

pub struct MembersPanel {
    viewer_uid: UserId,
    members: Vec<UserProfile>,
    search: String,
    counts: HashMap<UserId, usize>,
    counts_rx: mpsc::UnboundedReceiver<(UserId, usize)>,
    watchers: Vec<JoinHandle<()>>,
}

impl MembersPanel {
    /// Fetch the roster once and start one unread watcher per other member.
    pub async fn open(
        backend: Arc<dyn ChatBackend>,
        viewer: &AuthUser,
    ) -> Result<Self, StoreError> {
        let members = backend.list_users().await?;
        let (counts_tx, counts_rx) = mpsc::unbounded_channel();
        let mut watchers = Vec::new();
        for member in &members {
            if member.uid == viewer.uid {
                continue;
            }
            watchers.push(tokio::spawn(watch_unread(
                backend.clone(),
                viewer.uid.clone(),
                member.uid.clone(),
                counts_tx.clone(),
            )));
        }
        Ok(Self {
            viewer_uid: viewer.uid.clone(),
            members,
            search: String::new(),
            counts: HashMap::new(),
            counts_rx,
            watchers,
        })
    }

    pub fn members(&self) -> &[UserProfile] {
        &self.members
    }

    /// Drain pending recounts from the watcher tasks. Call once per frame.
    pub fn poll_counts(&mut self) {
        while let Ok((uid, count)) = self.counts_rx.try_recv() {
            self.counts.insert(uid, count);
        }
    }

    /// Current badge for a member; the viewer's own row never has one.
    pub fn unread(&self, uid: &str) -> usize {
        if uid == self.viewer_uid {
            return 0;
        }
        self.counts.get(uid).copied().unwrap_or(0)
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn search_mut(&mut self) -> &mut String {
        &mut self.search
    }

    pub fn set_search(&mut self, query: impl Into<String>) {
        self.search = query.into();
    }

    /// Roster rows matching the current search.
    pub fn visible(&self) -> Vec<&UserProfile> {
        filter_members(&self.members, &self.search)
    }
}

impl Drop for MembersPanel {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}

/// Subscribe to the viewer↔other conversation and push a recount on every
/// snapshot. The marker is re-fetched per snapshot, mirroring how the badge
/// must react to the marker moving when the conversation is opened.
async fn watch_unread(
    backend: Arc<dyn ChatBackend>,
    viewer_uid: UserId,
    other_uid: UserId,
    counts_tx: mpsc::UnboundedSender<(UserId, usize)>,
) {
    let conversation = ConversationId::between(&viewer_uid, &other_uid);
    let scope = MessageScope::Private(conversation.clone());
    let mut sub = backend.subscribe_messages(&scope).await;
    loop {
        let snapshot = sub.latest();
        let marker = match backend.read_marker(&conversation, &viewer_uid).await {
            Ok(marker) => marker,
            Err(e) => {
                log::debug!("read marker fetch failed for {}: {}", conversation, e);
                None
            }
        };
        let count = count_unread(&snapshot, &viewer_uid, marker);
        if counts_tx.send((other_uid.clone(), count)).is_err() {
            return;
        }
        if !sub.changed().await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AuthBackend, ChatBackend, Draft, MemoryBackend};
    use chrono::TimeZone;
    use std::time::Duration;

    fn profile(uid: &str, name: &str) -> UserProfile {
        UserProfile {
            uid: uid.to_string(),
            name: name.to_string(),
            photo_url: None,
            status: None,
        }
    }

    fn message(sender: &str, at: Option<DateTime<Utc>>) -> Message {
        Message {
            id: format!("m-{}", uuid::Uuid::new_v4()),
            sender_id: sender.to_string(),
            sender_name: sender.to_string(),
            text: "hi".to_string(),
            created_at: at,
            deleted: false,
            reply_to: None,
        }
    }

    #[test]
    fn unread_counts_only_the_other_party_after_the_marker() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 3, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 6, 3, 11, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap();
        let messages = vec![
            message("bob", Some(t0)),
            message("alice", Some(t1)),
            message("bob", Some(t2)),
            message("bob", None),
        ];
        // No marker: everything from bob with a timestamp counts.
        assert_eq!(count_unread(&messages, "alice", None), 2);
        // Marker at t1: only t2 is newer; the marker timestamp itself is seen.
        assert_eq!(count_unread(&messages, "alice", Some(t1)), 1);
        assert_eq!(count_unread(&messages, "alice", Some(t2)), 0);
    }

    #[test]
    fn filter_is_case_insensitive_and_non_destructive() {
        let members = vec![
            profile("u1", "Alice"),
            profile("u2", "Bob"),
            profile("u3", "alicia"),
        ];
        let hits = filter_members(&members, "ali");
        assert_eq!(hits.len(), 2);
        let hits = filter_members(&members, "  ");
        assert_eq!(hits.len(), 3);
        let hits = filter_members(&members, "zzz");
        assert!(hits.is_empty());
        assert_eq!(members.len(), 3);
    }

    #[tokio::test]
    async fn badges_track_snapshots_and_zero_after_marker_update() {
        let backend = Arc::new(MemoryBackend::new());
        let alice = backend.sign_up("a@example.com", "pw", "Alice").await.unwrap();
        let bob = backend.sign_up("b@example.com", "pw", "Bob").await.unwrap();
        backend.upsert_user(&profile(&alice.uid, "Alice")).await.unwrap();
        backend.upsert_user(&profile(&bob.uid, "Bob")).await.unwrap();

        let conversation = ConversationId::between(&alice.uid, &bob.uid);
        let scope = MessageScope::Private(conversation.clone());
        backend
            .send_message(&scope, Draft::new(&bob, "ping"))
            .await
            .unwrap();

        let chat: Arc<dyn ChatBackend> = backend.clone();
        let mut panel = MembersPanel::open(chat, &alice).await.unwrap();

        let mut badge = 0;
        for _ in 0..100 {
            panel.poll_counts();
            badge = panel.unread(&bob.uid);
            if badge > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(badge, 1);
        assert_eq!(panel.unread(&alice.uid), 0);

        // Opening the conversation moves the marker; the next snapshot
        // triggers a recount that zeroes the badge.
        backend
            .set_read_marker(&conversation, &alice.uid, Utc::now())
            .await
            .unwrap();
        backend
            .send_message(&scope, Draft::new(&alice, "pong"))
            .await
            .unwrap();
        let mut badge = usize::MAX;
        for _ in 0..100 {
            panel.poll_counts();
            badge = panel.unread(&bob.uid);
            if badge == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(badge, 0);
    }
}
