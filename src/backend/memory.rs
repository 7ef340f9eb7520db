use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::session::{IdentityError, IdentityProvider, ProfileStore, SessionEvent, StoreError};
use crate::types::{Profile, ProfileDefaults, RoleTag, Session};

/// In-process identity provider holding at most one signed-in session
pub struct MemoryIdentity {
    current: StdRwLock<Option<Session>>,
    events: broadcast::Sender<SessionEvent>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            current: StdRwLock::new(None),
            events,
        }
    }

    pub fn sign_in(&self, session: Session) {
        let user_id = session.user_id;
        if let Ok(mut current) = self.current.write() {
            *current = Some(session);
        }
        // No subscribers is fine
        let _ = self.events.send(SessionEvent::SignedIn { user_id });
    }

    fn take(&self) -> Option<Session> {
        self.current.write().ok().and_then(|mut current| current.take())
    }
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn get_current_session(&self) -> Result<Option<Session>, IdentityError> {
        self.current
            .read()
            .map(|current| current.clone())
            .map_err(|_| IdentityError::Backend("session lock poisoned".to_string()))
    }

    fn on_session_change(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        if let Some(session) = self.take() {
            let _ = self.events.send(SessionEvent::SignedOut {
                user_id: session.user_id,
            });
        }
        Ok(())
    }
}

/// Profile table kept in memory; used by the dev server and tests
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<Uuid, Profile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile for `session` with the given role
    pub async fn seed(&self, session: &Session, role: RoleTag) -> Profile {
        let mut profile = Profile::from_defaults(session.user_id, &ProfileDefaults::for_session(session));
        profile.role = role;
        self.profiles.write().await.insert(profile.user_id, profile.clone());
        profile
    }

    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.read().await.get(&user_id).cloned())
    }

    async fn create_profile_if_absent(
        &self,
        user_id: Uuid,
        defaults: &ProfileDefaults,
    ) -> Result<Profile, StoreError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles.entry(user_id).or_insert_with(|| {
            debug!("Creating default profile for {}", user_id);
            Profile::from_defaults(user_id, defaults)
        });
        Ok(profile.clone())
    }

    async fn update_role(&self, user_id: Uuid, role: RoleTag) -> Result<Profile, StoreError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles.get_mut(&user_id).ok_or(StoreError::NotFound(user_id))?;

        if !profile.role.is_unset() {
            return Err(StoreError::Conflict(format!(
                "role already set to '{}'",
                profile.role
            )));
        }

        profile.role = role;
        Ok(profile.clone())
    }
}
