use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::cache::SessionCache;
use super::choose_role::{ChooseRoleError, RoleAssignment};
use super::identity::{IdentityError, IdentityProvider, SessionEvent};
use super::navigation::{NavigationOutcome, Navigator};
use super::profile_store::ProfileStore;
use super::resolver::{Guard, ResolverConfig, SessionResolver};
use crate::types::{Profile, RoleTag, RoutingDecision};

/// How often the listener drops cached profiles whose session has expired
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Explicit owner of the shared session state.
///
/// Created once at startup with `init` and released with `teardown`. Holds the
/// process-wide profile cache and keeps it in step with identity events.
pub struct SessionContext {
    store: Arc<dyn ProfileStore>,
    cache: SessionCache,
    config: ResolverConfig,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionContext {
    /// Must be called from within a tokio runtime.
    pub fn init(
        events: broadcast::Receiver<SessionEvent>,
        store: Arc<dyn ProfileStore>,
        config: ResolverConfig,
    ) -> Arc<Self> {
        let cache = SessionCache::new();
        let listener = tokio::spawn(Self::listen(events, cache.clone()));
        info!("Session context initialised ({:?})", config);

        Arc::new(Self {
            store,
            cache,
            config,
            listener: Mutex::new(Some(listener)),
        })
    }

    async fn listen(mut events: broadcast::Receiver<SessionEvent>, cache: SessionCache) {
        let mut sweep = tokio::time::interval(CACHE_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        debug!("Session event {:?}", event);
                        cache.invalidate(event.user_id()).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Missed {} session events; dropping all cached profiles", missed);
                        cache.clear().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = sweep.tick() => {
                    cache.evict_expired().await;
                }
            }
        }
        debug!("Session event stream closed");
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    pub fn resolver(&self, identity: Arc<dyn IdentityProvider>) -> SessionResolver {
        SessionResolver::new(
            identity,
            self.store.clone(),
            self.cache.clone(),
            self.config.clone(),
        )
    }

    pub async fn resolve(
        &self,
        identity: Arc<dyn IdentityProvider>,
        required_role: Option<RoleTag>,
    ) -> RoutingDecision {
        self.resolver(identity).resolve(required_role).await
    }

    pub async fn resolve_landing(&self, identity: Arc<dyn IdentityProvider>) -> RoutingDecision {
        self.resolver(identity).resolve_landing().await
    }

    /// Resolve on behalf of a navigation to `target`. If the same client's
    /// `navigator` starts another navigation first, this one is abandoned and
    /// reports `Discarded`.
    pub async fn navigate(
        &self,
        navigator: &Navigator,
        identity: Arc<dyn IdentityProvider>,
        target: &str,
        guard: Guard,
    ) -> NavigationOutcome {
        let ticket = navigator.begin(target);
        let resolver = self.resolver(identity);
        ticket.run(resolver.resolve_guard(guard)).await
    }

    pub async fn choose_role(
        &self,
        identity: Arc<dyn IdentityProvider>,
        role: RoleTag,
    ) -> Result<Profile, ChooseRoleError> {
        RoleAssignment::new(
            identity,
            self.store.clone(),
            self.cache.clone(),
            self.config.call_timeout,
        )
            .choose_role(role)
            .await
    }

    /// Assign the role, then let the resolver pick where the user goes next
    pub async fn choose_role_and_resolve(
        &self,
        identity: Arc<dyn IdentityProvider>,
        role: RoleTag,
    ) -> Result<(Profile, RoutingDecision), ChooseRoleError> {
        let profile = self.choose_role(identity.clone(), role).await?;
        let next = self.resolve_landing(identity).await;
        Ok((profile, next))
    }

    pub async fn sign_out(&self, identity: Arc<dyn IdentityProvider>) -> Result<(), IdentityError> {
        let session = identity.get_current_session().await?;
        identity.sign_out().await?;
        if let Some(session) = session {
            self.cache.invalidate(session.user_id).await;
            info!("User {} signed out", session.user_id);
        }
        Ok(())
    }

    pub async fn teardown(&self) {
        let listener = self.listener.lock().ok().and_then(|mut l| l.take());
        if let Some(listener) = listener {
            listener.abort();
        }
        self.cache.clear().await;
        info!("Session context torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryIdentity, MemoryProfileStore};
    use crate::testing::{fast_config, session_for, Fault, ScriptedStore};
    use crate::types::{CHOOSE_ROLE_PATH, UNAUTHORIZED_PATH};
    use std::time::Duration;
    use uuid::Uuid;

    async fn wait_for_empty(cache: &SessionCache) -> bool {
        for _ in 0..100 {
            if cache.len().await == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn sign_out_event_invalidates_cache() {
        let identity = Arc::new(MemoryIdentity::new());
        let store = Arc::new(MemoryProfileStore::new());
        let session = session_for(Uuid::new_v4());
        store.seed(&session, RoleTag::Buyer).await;
        identity.sign_in(session.clone());

        // Subscribe after sign-in so the SignedIn event cannot race the fill below
        let ctx = SessionContext::init(identity.on_session_change(), store.clone(), fast_config());
        assert_eq!(ctx.resolve(identity.clone(), None).await, RoutingDecision::Render);
        assert_eq!(ctx.cache().len().await, 1);

        // Sign out through the provider directly; the listener must catch it
        identity.sign_out().await.unwrap();
        assert!(wait_for_empty(ctx.cache()).await);

        ctx.teardown().await;
    }

    #[tokio::test]
    async fn choosing_a_role_re_resolves_to_its_dashboard() {
        let identity = Arc::new(MemoryIdentity::new());
        let store = Arc::new(MemoryProfileStore::new());
        let ctx = SessionContext::init(identity.on_session_change(), store, fast_config());
        identity.sign_in(session_for(Uuid::new_v4()));

        // First visit creates the profile and asks for a role
        assert_eq!(
            ctx.resolve(identity.clone(), Some(RoleTag::Seller)).await,
            RoutingDecision::redirect(CHOOSE_ROLE_PATH)
        );

        let (profile, next) = ctx
            .choose_role_and_resolve(identity.clone(), RoleTag::Seller)
            .await
            .unwrap();
        assert_eq!(profile.role, RoleTag::Seller);
        assert_eq!(next, RoutingDecision::redirect("/seller-dashboard"));

        assert_eq!(
            ctx.resolve(identity.clone(), Some(RoleTag::Seller)).await,
            RoutingDecision::Render
        );
        assert_eq!(
            ctx.resolve(identity, Some(RoleTag::Buyer)).await,
            RoutingDecision::redirect(UNAUTHORIZED_PATH)
        );
    }

    #[tokio::test]
    async fn stale_navigation_is_discarded() {
        let store = Arc::new(ScriptedStore::new(MemoryProfileStore::new()));
        let mut config = fast_config();
        config.call_timeout = Duration::from_secs(1);
        let identity = Arc::new(MemoryIdentity::new());
        let ctx = SessionContext::init(identity.on_session_change(), store.clone(), config);

        let session = session_for(Uuid::new_v4());
        store.inner().seed(&session, RoleTag::Seller).await;
        identity.sign_in(session);

        // One tab: the user clicks a second link before the first resolves
        let tab = Navigator::new();
        store.script([Fault::Delay(Duration::from_millis(300))]);

        let first = ctx.navigate(
            &tab,
            identity.clone(),
            "/admin-dashboard",
            Guard::Protected(Some(RoleTag::Admin)),
        );
        let second = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx.navigate(
                &tab,
                identity.clone(),
                "/seller-dashboard",
                Guard::Protected(Some(RoleTag::Seller)),
            )
            .await
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, NavigationOutcome::Discarded);
        assert_eq!(second, NavigationOutcome::Applied(RoutingDecision::Render));
    }

    #[tokio::test]
    async fn concurrent_users_do_not_cancel_each_other() {
        let store = Arc::new(ScriptedStore::new(MemoryProfileStore::new()));
        let mut config = fast_config();
        config.call_timeout = Duration::from_secs(1);
        let slow_user = Arc::new(MemoryIdentity::new());
        let ctx = SessionContext::init(slow_user.on_session_change(), store.clone(), config);

        let slow_session = session_for(Uuid::new_v4());
        store.inner().seed(&slow_session, RoleTag::Seller).await;
        slow_user.sign_in(slow_session);

        let fast_user = Arc::new(MemoryIdentity::new());
        let fast_session = session_for(Uuid::new_v4());
        store.inner().seed(&fast_session, RoleTag::Buyer).await;
        fast_user.sign_in(fast_session);

        store.script([Fault::Delay(Duration::from_millis(100))]);

        let (slow_tab, fast_tab) = (Navigator::new(), Navigator::new());
        let first = ctx.navigate(
            &slow_tab,
            slow_user,
            "/seller-dashboard",
            Guard::Protected(Some(RoleTag::Seller)),
        );
        let second = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx.navigate(
                &fast_tab,
                fast_user,
                "/buyer-dashboard",
                Guard::Protected(Some(RoleTag::Buyer)),
            )
            .await
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, NavigationOutcome::Applied(RoutingDecision::Render));
        assert_eq!(second, NavigationOutcome::Applied(RoutingDecision::Render));
    }

    #[tokio::test]
    async fn role_chosen_during_resolve_is_not_overwritten_by_stale_read() {
        let store = Arc::new(ScriptedStore::new(MemoryProfileStore::new()));
        let mut config = fast_config();
        config.call_timeout = Duration::from_secs(1);
        let identity = Arc::new(MemoryIdentity::new());
        let session = session_for(Uuid::new_v4());
        store.inner().seed(&session, RoleTag::Unset).await;
        identity.sign_in(session);
        let ctx = SessionContext::init(identity.on_session_change(), store.clone(), config);

        // The resolve reads `unset`, then stalls while the role is chosen
        store.script([Fault::Stall(Duration::from_millis(150))]);
        let resolve = ctx.resolve(identity.clone(), Some(RoleTag::Seller));
        let choose = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx.choose_role(identity.clone(), RoleTag::Seller).await
        };
        let (stale, chosen) = tokio::join!(resolve, choose);

        assert_eq!(stale, RoutingDecision::redirect(CHOOSE_ROLE_PATH));
        assert_eq!(chosen.unwrap().role, RoleTag::Seller);
        assert_eq!(ctx.cache().len().await, 0);
        assert_eq!(
            ctx.resolve(identity, Some(RoleTag::Seller)).await,
            RoutingDecision::Render
        );
    }

    #[tokio::test]
    async fn teardown_clears_cache() {
        let identity = Arc::new(MemoryIdentity::new());
        let store = Arc::new(MemoryProfileStore::new());
        let ctx = SessionContext::init(identity.on_session_change(), store.clone(), fast_config());
        let session = session_for(Uuid::new_v4());
        store.seed(&session, RoleTag::Admin).await;
        identity.sign_in(session);

        ctx.resolve(identity.clone(), None).await;
        ctx.teardown().await;

        assert_eq!(ctx.cache().len().await, 0);
    }
}
