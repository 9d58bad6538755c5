//! Authentication signal plumbing.
//!
//! The authentication subsystem owns an [`AuthPublisher`]; the coordinator
//! holds the matching [`AuthSubscription`]. Only the latest signal matters, so
//! a `watch` channel carries it. `None` means no signal has been established
//! yet.

use cart_sync_core::{AuthSignal, Credential, UserId};
use tokio::sync::watch;

/// Receiving side of the authentication signal.
pub type AuthSubscription = watch::Receiver<Option<AuthSignal>>;

/// Create a publisher and subscription with no signal established.
#[must_use]
pub fn auth_channel() -> (AuthPublisher, AuthSubscription) {
    let (tx, rx) = watch::channel(None);
    (AuthPublisher { tx }, rx)
}

/// Sending side of the authentication signal.
#[derive(Debug, Clone)]
pub struct AuthPublisher {
    tx: watch::Sender<Option<AuthSignal>>,
}

impl AuthPublisher {
    /// Publish a signal, replacing the previous one.
    pub fn publish(&self, signal: AuthSignal) {
        self.tx.send_replace(Some(signal));
    }

    /// The user signed in (or their credential was refreshed).
    pub fn sign_in(&self, user_id: impl Into<UserId>, credential: Credential) {
        self.publish(AuthSignal::authenticated(user_id, credential));
    }

    /// The user signed out, or the session started anonymous.
    pub fn sign_out(&self) {
        self.publish(AuthSignal::Anonymous);
    }

    /// Another subscription to the same signal.
    #[must_use]
    pub fn subscribe(&self) -> AuthSubscription {
        self.tx.subscribe()
    }

    /// The most recently published signal.
    #[must_use]
    pub fn current(&self) -> Option<AuthSignal> {
        self.tx.borrow().clone()
    }
}
