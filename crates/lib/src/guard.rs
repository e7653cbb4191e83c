//! Session guard: gates the chat views on the auth provider's current-user
//! stream.
//!
//! While the provider has not resolved the session the guard reports
//! `Checking` (render a loading placeholder). After the first resolution it
//! is `Authenticated` or `Unauthenticated` and never returns to `Checking`
//! for the lifetime of the mount. A missing user is the negative result, not
//! an error.

use crate::backend::{AuthBackend, AuthState};
use crate::model::AuthUser;
use crate::subscription::Subscription;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Checking,
    Authenticated(AuthUser),
    Unauthenticated,
}

pub struct SessionGuard {
    sub: Subscription<AuthState>,
}

impl SessionGuard {
    pub async fn mount(auth: &dyn AuthBackend) -> Self {
        Self {
            sub: auth.watch_user().await,
        }
    }

    /// Guard over an already-obtained auth subscription.
    pub fn from_subscription(sub: Subscription<AuthState>) -> Self {
        Self { sub }
    }

    pub fn state(&self) -> GateState {
        match self.sub.latest() {
            AuthState::Unknown => GateState::Checking,
            AuthState::SignedIn(user) => GateState::Authenticated(user),
            AuthState::SignedOut => GateState::Unauthenticated,
        }
    }

    /// Wait until the provider has resolved the session. If the stream ends
    /// while still unresolved, the absent user counts as `Unauthenticated`.
    pub async fn resolved(&mut self) -> GateState {
        loop {
            match self.state() {
                GateState::Checking => {
                    if !self.sub.changed().await {
                        return GateState::Unauthenticated;
                    }
                }
                state => return state,
            }
        }
    }
}
