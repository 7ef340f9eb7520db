use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::cache::SessionCache;
use super::identity::{IdentityError, IdentityProvider};
use super::profile_store::{ProfileStore, StoreError};
use crate::types::{Profile, ProfileDefaults, RoleTag, Session};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChooseRoleError {
    #[error("No active session")]
    Unauthenticated,

    #[error("Role '{0}' cannot be chosen")]
    InvalidRole(RoleTag),

    #[error("Role already assigned as '{0}'")]
    AlreadyAssigned(RoleTag),

    #[error("{op} timed out after {after:?}")]
    TimedOut { op: &'static str, after: Duration },

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One-time role self-assignment for a signed-in user whose role is unset
pub struct RoleAssignment {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn ProfileStore>,
    cache: SessionCache,
    call_timeout: Duration,
}

impl RoleAssignment {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn ProfileStore>,
        cache: SessionCache,
        call_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            store,
            cache,
            call_timeout,
        }
    }

    /// Bound one collaborator call by the per-call timeout
    async fn bounded<T, E, Fut>(&self, op: &'static str, call: Fut) -> Result<T, ChooseRoleError>
    where
        ChooseRoleError: From<E>,
        Fut: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result.map_err(ChooseRoleError::from),
            Err(_) => {
                warn!("{} timed out after {:?}", op, self.call_timeout);
                Err(ChooseRoleError::TimedOut {
                    op,
                    after: self.call_timeout,
                })
            }
        }
    }

    /// Record `role` for the current user. Choosing the role the user already
    /// has succeeds; choosing a different one after assignment does not.
    pub async fn choose_role(&self, role: RoleTag) -> Result<Profile, ChooseRoleError> {
        if role.is_unset() {
            return Err(ChooseRoleError::InvalidRole(role));
        }

        let session = self
            .bounded("get_current_session", self.identity.get_current_session())
            .await?
            .filter(|s| !s.is_expired())
            .ok_or(ChooseRoleError::Unauthenticated)?;
        let user_id = session.user_id;

        let result = self.assign(&session, role).await;

        // Whatever happened, the cached role may now be stale
        self.cache.invalidate(user_id).await;

        match result {
            Ok(profile) => {
                info!("User {} chose role '{}'", user_id, role);
                Ok(profile)
            }
            Err(ChooseRoleError::Store(StoreError::Conflict(msg))) => match self
                .bounded("get_profile", self.store.get_profile(user_id))
                .await?
            {
                Some(profile) if profile.role == role => Ok(profile),
                Some(profile) => {
                    warn!(
                        "User {} tried to change role from '{}' to '{}'",
                        user_id, profile.role, role
                    );
                    Err(ChooseRoleError::AlreadyAssigned(profile.role))
                }
                None => Err(StoreError::Conflict(msg).into()),
            },
            Err(e) => Err(e),
        }
    }

    async fn assign(&self, session: &Session, role: RoleTag) -> Result<Profile, ChooseRoleError> {
        let user_id = session.user_id;
        match self
            .bounded("update_role", self.store.update_role(user_id, role))
            .await
        {
            Err(ChooseRoleError::Store(StoreError::NotFound(_))) => {
                let defaults = ProfileDefaults::for_session(session);
                self.bounded(
                    "create_profile_if_absent",
                    self.store.create_profile_if_absent(user_id, &defaults),
                )
                .await?;
                self.bounded("update_role", self.store.update_role(user_id, role))
                    .await
            }
            other => other,
        }
    }
}
