//! Concrete identity and profile store backends

pub mod memory;
pub mod postgres;
pub mod postgrest;
pub mod token;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::config::{AppConfig, BackendKind};
use crate::session::ProfileStore;

/// Build the profile store selected by `config.backend.kind`
pub async fn build_store(config: &AppConfig) -> Result<Arc<dyn ProfileStore>> {
    let store: Arc<dyn ProfileStore> = match config.backend.kind {
        BackendKind::Memory => Arc::new(memory::MemoryProfileStore::new()),
        BackendKind::Postgres => {
            let url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set for the postgres backend")?;
            let store = postgres::PgProfileStore::connect(&url, &config.database).await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
        BackendKind::Postgrest => {
            let rest_url = config
                .backend
                .rest_url
                .as_deref()
                .ok_or_else(|| anyhow!("GATE_REST_URL must be set for the postgrest backend"))?;
            let service_key = config
                .backend
                .service_key
                .as_deref()
                .ok_or_else(|| anyhow!("GATE_SERVICE_KEY must be set for the postgrest backend"))?;
            Arc::new(postgrest::PostgrestProfileStore::new(
                rest_url,
                service_key,
                config.session.call_timeout(),
            )?)
        }
    };

    info!("Profile store backend: {:?}", config.backend.kind);
    Ok(store)
}
