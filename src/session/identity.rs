use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::Session;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Network or service hiccup; safe to retry
    #[error("Identity provider unavailable: {0}")]
    Transient(String),

    #[error("Identity provider error: {0}")]
    Backend(String),
}

impl IdentityError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IdentityError::Transient(_))
    }
}

/// Auth state changes pushed by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: Uuid },
    SignedOut { user_id: Uuid },
}

impl SessionEvent {
    pub fn user_id(&self) -> Uuid {
        match self {
            SessionEvent::SignedIn { user_id } | SessionEvent::SignedOut { user_id } => *user_id,
        }
    }
}

/// Source of truth for "who is signed in"
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current session, or `None` when nobody is signed in.
    /// Expired sessions may be returned; the resolver treats them as absent.
    async fn get_current_session(&self) -> Result<Option<Session>, IdentityError>;

    /// Subscribe to sign-in / sign-out events. Dropping the receiver unsubscribes.
    fn on_session_change(&self) -> broadcast::Receiver<SessionEvent>;

    async fn sign_out(&self) -> Result<(), IdentityError>;
}
