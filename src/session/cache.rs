use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::types::Profile;

/// Tickets older than this can no longer fill the cache, so invalidation marks
/// older than this are safe to forget.
pub const TICKET_LIFETIME: Duration = Duration::from_secs(60);

/// Taken before a store lookup and handed back with the result. A fill whose
/// ticket predates an invalidation of the same user is dropped.
#[derive(Debug, Clone, Copy)]
pub struct FillTicket {
    user_id: Uuid,
    sequence: u64,
    issued_at: Instant,
}

#[derive(Debug)]
struct CachedProfile {
    profile: Profile,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Invalidation {
    sequence: u64,
    at: Instant,
}

#[derive(Debug, Default)]
struct Entries {
    profiles: HashMap<Uuid, CachedProfile>,
    invalidations: HashMap<Uuid, Invalidation>,
    /// Bumped by every invalidate and clear
    sequence: u64,
    cleared_at: u64,
}

impl Entries {
    fn accepts(&self, ticket: &FillTicket) -> bool {
        if ticket.issued_at.elapsed() >= TICKET_LIFETIME || self.cleared_at > ticket.sequence {
            return false;
        }
        self.invalidations
            .get(&ticket.user_id)
            .map_or(true, |mark| mark.sequence <= ticket.sequence)
    }
}

/// Process-wide profile cache keyed by user id.
///
/// Filled by the resolver after a successful lookup. Entries are dropped on
/// sign-in, sign-out and role change, and stop being served once the session
/// they were read under has expired.
#[derive(Debug, Clone, Default)]
pub struct SessionCache {
    entries: Arc<RwLock<Entries>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user_id: Uuid) -> Option<Profile> {
        let entries = self.entries.read().await;
        entries
            .profiles
            .get(&user_id)
            .filter(|cached| cached.expires_at > Utc::now())
            .map(|cached| cached.profile.clone())
    }

    pub async fn ticket(&self, user_id: Uuid) -> FillTicket {
        FillTicket {
            user_id,
            sequence: self.entries.read().await.sequence,
            issued_at: Instant::now(),
        }
    }

    /// Store `profile` until `expires_at`, unless the user was invalidated
    /// after `ticket` was taken. Returns whether the entry was stored.
    pub(crate) async fn fill(
        &self,
        ticket: FillTicket,
        profile: Profile,
        expires_at: DateTime<Utc>,
    ) -> bool {
        let mut entries = self.entries.write().await;
        if !entries.accepts(&ticket) || profile.user_id != ticket.user_id {
            debug!("Dropped stale profile fill for {}", ticket.user_id);
            return false;
        }
        entries
            .profiles
            .insert(profile.user_id, CachedProfile { profile, expires_at });
        true
    }

    pub async fn invalidate(&self, user_id: Uuid) {
        let mut entries = self.entries.write().await;
        entries.sequence += 1;
        let mark = Invalidation {
            sequence: entries.sequence,
            at: Instant::now(),
        };
        entries.invalidations.insert(user_id, mark);
        if entries.profiles.remove(&user_id).is_some() {
            debug!("Invalidated cached profile for {}", user_id);
        }
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.sequence += 1;
        entries.cleared_at = entries.sequence;
        entries.invalidations.clear();
        let count = entries.profiles.len();
        entries.profiles.clear();
        debug!("Cleared {} cached profiles", count);
    }

    /// Drop profiles whose session has expired and invalidation marks no live
    /// ticket can observe. Returns the number of profiles dropped.
    pub async fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.profiles.len();
        entries.profiles.retain(|_, cached| cached.expires_at > now);
        entries
            .invalidations
            .retain(|_, mark| mark.at.elapsed() < TICKET_LIFETIME);
        let evicted = before - entries.profiles.len();
        if evicted > 0 {
            debug!("Evicted {} expired cached profiles", evicted);
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.profiles.len()
    }
}
