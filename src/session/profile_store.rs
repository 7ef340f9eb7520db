use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Profile, ProfileDefaults, RoleTag};

/// Errors from profile store backends
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Profile not found: {0}")]
    NotFound(Uuid),

    /// Unique-key collision or a guarded update that matched nothing
    #[error("Profile write conflict: {0}")]
    Conflict(String),

    /// Network, pool or timeout trouble; safe to retry
    #[error("Profile store unavailable: {0}")]
    Transient(String),

    #[error("Profile store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Persistence boundary for user profiles
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError>;

    /// Create the profile with role `unset` unless one already exists.
    /// Returns whichever row is stored afterwards; a concurrent insert is not an error.
    async fn create_profile_if_absent(
        &self,
        user_id: Uuid,
        defaults: &ProfileDefaults,
    ) -> Result<Profile, StoreError>;

    /// Record the role. Implementations only write while the stored role is unset and
    /// report `Conflict` otherwise, `NotFound` when there is no row.
    async fn update_role(&self, user_id: Uuid, role: RoleTag) -> Result<Profile, StoreError>;

    /// Cheap connectivity probe used by the health endpoint
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
