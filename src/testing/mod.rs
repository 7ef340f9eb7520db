//! Test doubles that wrap the in-memory backend with scripted faults

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::backend::memory::{MemoryIdentity, MemoryProfileStore};
use crate::session::{
    IdentityError, IdentityProvider, ProfileStore, ResolverConfig, SessionEvent, StoreError,
};
use crate::types::{Profile, ProfileDefaults, RoleTag, Session};

/// What the next collaborator call should do
#[derive(Debug, Clone)]
pub enum Fault {
    Pass,
    Transient,
    Backend,
    /// Sleep before delegating; pair with a short call timeout
    Delay(Duration),
    /// Delegate, then sleep before returning what was read
    Stall(Duration),
    /// Another writer stores a profile with this role, then our write reports a conflict
    RaceWith(RoleTag),
}

pub fn session_for(user_id: Uuid) -> Session {
    Session {
        user_id,
        email: format!("{}@example.com", user_id.simple()),
        expiry: Utc::now() + ChronoDuration::hours(1),
    }
}

pub fn fast_config() -> ResolverConfig {
    ResolverConfig {
        resolve_timeout: Duration::from_secs(2),
        call_timeout: Duration::from_millis(30),
        retry_backoff: Duration::from_millis(1),
        max_retries: 1,
    }
}

#[derive(Default)]
struct Script(Mutex<VecDeque<Fault>>);

impl Script {
    fn push(&self, faults: impl IntoIterator<Item = Fault>) {
        if let Ok(mut script) = self.0.lock() {
            script.extend(faults);
        }
    }

    fn next(&self) -> Fault {
        self.0
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(Fault::Pass)
    }
}

pub struct ScriptedStore {
    inner: MemoryProfileStore,
    script: Script,
    get_calls: AtomicUsize,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(inner: MemoryProfileStore) -> Self {
        Self {
            inner,
            script: Script::default(),
            get_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryProfileStore {
        &self.inner
    }

    /// Faults are consumed one per call, across all store methods
    pub fn script(&self, faults: impl IntoIterator<Item = Fault>) {
        self.script.push(faults);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    async fn apply(&self, fault: Fault, user_id: Uuid) -> Result<(), StoreError> {
        match fault {
            Fault::Pass => Ok(()),
            Fault::Transient => Err(StoreError::Transient("connection reset".to_string())),
            Fault::Backend => Err(StoreError::Backend("permission denied".to_string())),
            Fault::Delay(d) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
            Fault::Stall(_) => Ok(()),
            Fault::RaceWith(role) => {
                self.inner.seed(&session_for(user_id), role).await;
                Err(StoreError::Conflict("duplicate key value".to_string()))
            }
        }
    }
}

async fn stall(fault: &Fault) {
    if let Fault::Stall(d) = fault {
        tokio::time::sleep(*d).await;
    }
}

#[async_trait]
impl ProfileStore for ScriptedStore {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.script.next();
        self.apply(fault.clone(), user_id).await?;
        let read = self.inner.get_profile(user_id).await;
        stall(&fault).await;
        read
    }

    async fn create_profile_if_absent(
        &self,
        user_id: Uuid,
        defaults: &ProfileDefaults,
    ) -> Result<Profile, StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.script.next();
        self.apply(fault.clone(), user_id).await?;
        let created = self.inner.create_profile_if_absent(user_id, defaults).await;
        stall(&fault).await;
        created
    }

    async fn update_role(&self, user_id: Uuid, role: RoleTag) -> Result<Profile, StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.script.next();
        self.apply(fault.clone(), user_id).await?;
        let updated = self.inner.update_role(user_id, role).await;
        stall(&fault).await;
        updated
    }
}

pub struct ScriptedIdentity {
    inner: Arc<MemoryIdentity>,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedIdentity {
    pub fn new(inner: Arc<MemoryIdentity>) -> Self {
        Self {
            inner,
            script: Script::default(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, faults: impl IntoIterator<Item = Fault>) {
        self.script.push(faults);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for ScriptedIdentity {
    async fn get_current_session(&self) -> Result<Option<Session>, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.next() {
            Fault::Transient => Err(IdentityError::Transient("auth endpoint unreachable".to_string())),
            Fault::Backend => Err(IdentityError::Backend("bad gateway".to_string())),
            Fault::Delay(d) => {
                tokio::time::sleep(d).await;
                self.inner.get_current_session().await
            }
            Fault::Stall(d) => {
                let session = self.inner.get_current_session().await;
                tokio::time::sleep(d).await;
                session
            }
            Fault::Pass | Fault::RaceWith(_) => self.inner.get_current_session().await,
        }
    }

    fn on_session_change(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.on_session_change()
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.inner.sign_out().await
    }
}
