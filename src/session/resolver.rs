use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache::{FillTicket, SessionCache};
use super::identity::{IdentityError, IdentityProvider};
use super::profile_store::{ProfileStore, StoreError};
use crate::config::SessionConfig;
use crate::types::{
    FailureKind, Profile, ProfileDefaults, RoleTag, RoutingDecision, Session, CHOOSE_ROLE_PATH,
    LOGIN_PATH, UNAUTHORIZED_PATH,
};

/// Timing knobs for a single resolution
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Upper bound for the whole resolve() call
    pub resolve_timeout: Duration,
    /// Upper bound for each collaborator call
    pub call_timeout: Duration,
    pub retry_backoff: Duration,
    pub max_retries: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(3),
            call_timeout: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(200),
            max_retries: 1,
        }
    }
}

impl From<&SessionConfig> for ResolverConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            resolve_timeout: config.resolve_timeout(),
            call_timeout: config.call_timeout(),
            retry_backoff: config.retry_backoff(),
            max_retries: config.max_retries,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("{op} failed after retry: {message}")]
    Transient { op: &'static str, message: String },

    #[error("{op} failed: {message}")]
    Backend { op: &'static str, message: String },

    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),
}

impl ResolveError {
    pub fn into_decision(self) -> RoutingDecision {
        let kind = match &self {
            ResolveError::Transient { .. } => FailureKind::Transient,
            ResolveError::Backend { .. } => FailureKind::Backend,
            ResolveError::Timeout(_) => FailureKind::Timeout,
        };
        RoutingDecision::failed(kind, self.to_string())
    }
}

/// Collaborator errors that may be worth a second attempt
trait CallError: Display {
    fn is_transient(&self) -> bool;
}

impl CallError for IdentityError {
    fn is_transient(&self) -> bool {
        IdentityError::is_transient(self)
    }
}

impl CallError for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

/// Access outcome for a fully resolved visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Unauthenticated,
    Unassigned,
    Forbidden { required: RoleTag, actual: RoleTag },
    Granted(RoleTag),
}

impl Verdict {
    /// `None` means there is no live session.
    pub fn evaluate(profile: Option<&Profile>, required: Option<RoleTag>) -> Self {
        let Some(profile) = profile else {
            return Verdict::Unauthenticated;
        };
        match (profile.role, required) {
            (RoleTag::Unset, _) => Verdict::Unassigned,
            (actual, Some(required)) if actual != required => Verdict::Forbidden { required, actual },
            (actual, _) => Verdict::Granted(actual),
        }
    }
}

/// What the caller is about to show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// A guarded view, optionally restricted to one role
    Protected(Option<RoleTag>),
    /// The generic dashboard entry that forwards to the role's home
    Landing,
}

impl Guard {
    fn required_role(&self) -> Option<RoleTag> {
        match self {
            Guard::Protected(role) => *role,
            Guard::Landing => None,
        }
    }

    pub fn decision(&self, verdict: Verdict) -> RoutingDecision {
        match verdict {
            Verdict::Unauthenticated => RoutingDecision::redirect(LOGIN_PATH),
            Verdict::Unassigned => RoutingDecision::redirect(CHOOSE_ROLE_PATH),
            Verdict::Forbidden { .. } => RoutingDecision::redirect(UNAUTHORIZED_PATH),
            Verdict::Granted(role) => match self {
                Guard::Protected(_) => RoutingDecision::Render,
                Guard::Landing => RoutingDecision::redirect(role.home_path()),
            },
        }
    }
}

#[derive(Debug)]
enum ResolveState {
    Init,
    HasSession(Session),
    HasProfile(Profile),
    Done(Verdict),
}

/// Resolves one navigation into exactly one routing decision.
///
/// States only move forward (Init -> HasSession -> HasProfile -> Done), so every
/// terminal redirect is reached without a loop.
pub struct SessionResolver {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn ProfileStore>,
    cache: SessionCache,
    config: ResolverConfig,
}

impl SessionResolver {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn ProfileStore>,
        cache: SessionCache,
        config: ResolverConfig,
    ) -> Self {
        Self {
            identity,
            store,
            cache,
            config,
        }
    }

    pub async fn resolve(&self, required_role: Option<RoleTag>) -> RoutingDecision {
        self.resolve_guard(Guard::Protected(required_role)).await
    }

    pub async fn resolve_landing(&self) -> RoutingDecision {
        self.resolve_guard(Guard::Landing).await
    }

    pub async fn resolve_guard(&self, guard: Guard) -> RoutingDecision {
        match tokio::time::timeout(self.config.resolve_timeout, self.run(guard)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!("Session resolution failed: {}", e);
                e.into_decision()
            }
            Err(_) => {
                let e = ResolveError::Timeout(self.config.resolve_timeout);
                warn!("Session resolution failed: {}", e);
                e.into_decision()
            }
        }
    }

    async fn run(&self, guard: Guard) -> Result<RoutingDecision, ResolveError> {
        let mut state = ResolveState::Init;
        loop {
            state = match state {
                ResolveState::Init => match self.current_session().await? {
                    Some(session) => ResolveState::HasSession(session),
                    None => ResolveState::Done(Verdict::Unauthenticated),
                },
                ResolveState::HasSession(session) => {
                    ResolveState::HasProfile(self.load_profile(&session).await?)
                }
                ResolveState::HasProfile(profile) => {
                    ResolveState::Done(Verdict::evaluate(Some(&profile), guard.required_role()))
                }
                ResolveState::Done(verdict) => {
                    let decision = guard.decision(verdict);
                    debug!("Resolved {:?} as {:?} -> {:?}", guard, verdict, decision);
                    return Ok(decision);
                }
            };
            debug!("Resolver advanced to {:?}", state);
        }
    }

    async fn current_session(&self) -> Result<Option<Session>, ResolveError> {
        let identity = &self.identity;
        let session = self
            .with_retry("get_current_session", move || async move {
                identity.get_current_session().await
            })
            .await?;

        Ok(session.filter(|s| {
            let expired = s.is_expired();
            if expired {
                debug!("Session for {} expired at {}", s.user_id, s.expiry);
            }
            !expired
        }))
    }

    async fn load_profile(&self, session: &Session) -> Result<Profile, ResolveError> {
        if let Some(profile) = self.cache.get(session.user_id).await {
            return Ok(profile);
        }

        // Taken before the lookup so a role change landing mid-flight wins
        let ticket = self.cache.ticket(session.user_id).await;
        match self.fetch_profile(session).await? {
            Some(profile) => {
                self.cache.fill(ticket, profile.clone(), session.expiry).await;
                Ok(profile)
            }
            None => self.create_default_profile(session, ticket).await,
        }
    }

    async fn fetch_profile(&self, session: &Session) -> Result<Option<Profile>, ResolveError> {
        let store = &self.store;
        let user_id = session.user_id;
        self.with_retry("get_profile", move || async move {
            match store.get_profile(user_id).await {
                Err(StoreError::NotFound(_)) => Ok(None),
                other => other,
            }
        })
        .await
    }

    async fn create_default_profile(
        &self,
        session: &Session,
        ticket: FillTicket,
    ) -> Result<Profile, ResolveError> {
        info!("No profile for user {}; creating default", session.user_id);

        let store = &self.store;
        let user_id = session.user_id;
        let defaults = ProfileDefaults::for_session(session);
        let defaults_ref = &defaults;

        let created = self
            .with_retry("create_profile_if_absent", move || async move {
                match store.create_profile_if_absent(user_id, defaults_ref).await {
                    Ok(profile) => Ok(Some(profile)),
                    Err(StoreError::Conflict(msg)) => {
                        debug!("Profile for {} already created concurrently: {}", user_id, msg);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;

        if let Some(profile) = created {
            self.cache.fill(ticket, profile.clone(), session.expiry).await;
            return Ok(profile);
        }

        // Someone else won the insert; their row is authoritative
        match self.fetch_profile(session).await? {
            Some(profile) => {
                self.cache.fill(ticket, profile.clone(), session.expiry).await;
                Ok(profile)
            }
            None => {
                warn!(
                    "Profile for {} reported as existing but could not be read back; using defaults",
                    user_id
                );
                Ok(Profile::from_defaults(user_id, &defaults))
            }
        }
    }

    /// Run a collaborator call under the per-call timeout, retrying transient
    /// failures up to `max_retries` times.
    async fn with_retry<T, E, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, ResolveError>
    where
        E: CallError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            let message = match tokio::time::timeout(self.config.call_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() => e.to_string(),
                Ok(Err(e)) => {
                    return Err(ResolveError::Backend {
                        op,
                        message: e.to_string(),
                    })
                }
                Err(_) => format!("timed out after {:?}", self.config.call_timeout),
            };

            if attempt >= self.config.max_retries {
                return Err(ResolveError::Transient { op, message });
            }
            attempt += 1;
            warn!(
                "{} failed ({}); retry {}/{} in {:?}",
                op, message, attempt, self.config.max_retries, self.config.retry_backoff
            );
            tokio::time::sleep(self.config.retry_backoff).await;
        }
    }
}
