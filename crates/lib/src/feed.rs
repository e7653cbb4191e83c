//! Message stream adapter: the live ordered query behind a chat view.
//!
//! Every delivery replaces the whole in-memory sequence with the latest
//! snapshot (full-replace, not incremental patch). Simple, and acceptable at
//! the volumes this client sees. The subscription is released when the feed
//! is dropped or its scope changes, so no stale updates outlive a view.

use crate::backend::ChatBackend;
use crate::model::{Message, MessageScope};
use crate::subscription::Subscription;

pub struct MessageFeed {
    scope: MessageScope,
    sub: Subscription<Vec<Message>>,
}

impl MessageFeed {
    pub async fn open(backend: &dyn ChatBackend, scope: MessageScope) -> Self {
        let sub = backend.subscribe_messages(&scope).await;
        Self { scope, sub }
    }

    pub fn scope(&self) -> &MessageScope {
        &self.scope
    }

    /// The latest snapshot, ascending by creation time.
    pub fn messages(&self) -> Vec<Message> {
        self.sub.latest()
    }

    /// Wait for the next snapshot. False when the backend closed the stream.
    pub async fn changed(&mut self) -> bool {
        self.sub.changed().await
    }

    /// Rebind to a different scope. Replacing the subscription releases the
    /// old listener, so updates for the previous scope can no longer land.
    pub async fn switch(&mut self, backend: &dyn ChatBackend, scope: MessageScope) {
        self.sub = backend.subscribe_messages(&scope).await;
        self.scope = scope;
    }
}
