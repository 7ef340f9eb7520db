use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::auth::{decode_jwt, Claims, JwtError};
use crate::session::{IdentityError, IdentityProvider, SessionEvent};
use crate::types::Session;

/// Verifies bearer access tokens and tracks tokens signed out through this server
pub struct TokenAuthority {
    secret: String,
    /// token -> exp, pruned once the token would have expired anyway
    revoked: RwLock<HashMap<String, i64>>,
    events: broadcast::Sender<SessionEvent>,
}

impl TokenAuthority {
    pub fn new(secret: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            secret: secret.into(),
            revoked: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Identity provider scoped to one request's bearer token
    pub fn bind(self: &Arc<Self>, token: Option<String>) -> BearerIdentity {
        BearerIdentity {
            authority: Arc::clone(self),
            token,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = decode_jwt(token, &self.secret)?;
        let revoked = self
            .revoked
            .read()
            .map(|revoked| revoked.contains_key(token))
            .unwrap_or(false);
        if revoked {
            return Err(JwtError::Revoked);
        }
        Ok(claims)
    }

    fn revoke(&self, token: &str, claims: &Claims) {
        let now = Utc::now().timestamp();
        if let Ok(mut revoked) = self.revoked.write() {
            revoked.retain(|_, exp| *exp > now);
            revoked.insert(token.to_string(), claims.exp);
        }
        info!("Revoked session token for user {}", claims.sub);
        let _ = self.events.send(SessionEvent::SignedOut { user_id: claims.sub });
    }
}

pub struct BearerIdentity {
    authority: Arc<TokenAuthority>,
    token: Option<String>,
}

#[async_trait]
impl IdentityProvider for BearerIdentity {
    async fn get_current_session(&self) -> Result<Option<Session>, IdentityError> {
        let Some(token) = self.token.as_deref() else {
            return Ok(None);
        };

        match self.authority.verify(token) {
            Ok(claims) => Ok(Some(claims.into_session())),
            Err(JwtError::InvalidSecret) => Err(IdentityError::Backend(
                "JWT secret not configured".to_string(),
            )),
            Err(e) => {
                debug!("Bearer token rejected: {}", e);
                Ok(None)
            }
        }
    }

    fn on_session_change(&self) -> broadcast::Receiver<SessionEvent> {
        self.authority.subscribe()
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        if let Some(token) = self.token.as_deref() {
            if let Ok(claims) = self.authority.verify(token) {
                self.authority.revoke(token, &claims);
            }
        }
        Ok(())
    }
}
