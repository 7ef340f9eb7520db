use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::session::{ProfileStore, StoreError};
use crate::types::{Profile, ProfileDefaults, RoleTag};

const PROFILE_COLUMNS: &str = "id, full_name, email, role, city, created_at";

const CREATE_PROFILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    id UUID PRIMARY KEY,
    full_name TEXT,
    email TEXT,
    role TEXT NOT NULL DEFAULT 'unset',
    city TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// Profile store talking to Postgres directly
#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub async fn connect(database_url: &str, config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(database_url)
            .await
            .map_err(classify)?;

        info!("Connected profile store (max {} connections)", config.max_connections);
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_PROFILES_TABLE)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        let query = format!("SELECT {} FROM profiles WHERE id = $1", PROFILE_COLUMNS);
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.as_ref().map(profile_from_row).transpose()
    }

    async fn create_profile_if_absent(
        &self,
        user_id: Uuid,
        defaults: &ProfileDefaults,
    ) -> Result<Profile, StoreError> {
        let query = format!(
            "INSERT INTO profiles (id, full_name, email, role, city) \
             VALUES ($1, $2, $3, 'unset', $4) \
             ON CONFLICT (id) DO NOTHING \
             RETURNING {}",
            PROFILE_COLUMNS
        );
        let inserted = sqlx::query(&query)
            .bind(user_id)
            .bind(&defaults.full_name)
            .bind(&defaults.email)
            .bind(&defaults.city)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        if let Some(row) = inserted {
            debug!("Created profile {}", user_id);
            return profile_from_row(&row);
        }

        // Lost the insert race; hand back the winner's row
        self.get_profile(user_id)
            .await?
            .ok_or_else(|| StoreError::Conflict(format!("profile {} vanished after conflict", user_id)))
    }

    async fn update_role(&self, user_id: Uuid, role: RoleTag) -> Result<Profile, StoreError> {
        let query = format!(
            "UPDATE profiles SET role = $2 \
             WHERE id = $1 AND role IN ('unset', 'none') \
             RETURNING {}",
            PROFILE_COLUMNS
        );
        let updated = sqlx::query(&query)
            .bind(user_id)
            .bind(role.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        match updated {
            Some(row) => profile_from_row(&row),
            None => match self.get_profile(user_id).await? {
                Some(existing) => Err(StoreError::Conflict(format!(
                    "role already set to {}",
                    existing.role
                ))),
                None => Err(StoreError::NotFound(user_id)),
            },
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

fn profile_from_row(row: &PgRow) -> Result<Profile, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Backend(format!("bad profile row: {}", e));

    let role: Option<String> = row.try_get("role").map_err(decode)?;
    let role = role
        .unwrap_or_default()
        .parse::<RoleTag>()
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    let email: Option<String> = row.try_get("email").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;

    Ok(Profile {
        user_id: row.try_get("id").map_err(decode)?,
        full_name: row.try_get("full_name").map_err(decode)?,
        email: email.unwrap_or_default(),
        role,
        city: row.try_get("city").map_err(decode)?,
        created_at,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlState {
    UniqueViolation,
    Retryable,
    Other,
}

fn classify_sqlstate(code: &str) -> SqlState {
    match code {
        "23505" => SqlState::UniqueViolation,
        // serialization_failure, deadlock_detected, admin/crash shutdown, cannot_connect_now
        "40001" | "40P01" | "57P01" | "57P02" | "57P03" => SqlState::Retryable,
        // connection_exception class
        c if c.starts_with("08") => SqlState::Retryable,
        _ => SqlState::Other,
    }
}

fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            match classify_sqlstate(&code) {
                SqlState::UniqueViolation => StoreError::Conflict(db.message().to_string()),
                SqlState::Retryable => StoreError::Transient(db.message().to_string()),
                SqlState::Other => StoreError::Backend(err.to_string()),
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Transient(err.to_string()),
        _ => StoreError::Backend(err.to_string()),
    }
}
