use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub session: SessionConfig,
    pub backend: BackendConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub resolve_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Postgres,
    Postgrest,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendKind::Memory),
            "postgres" | "pg" => Ok(BackendKind::Postgres),
            "postgrest" | "rest" | "supabase" => Ok(BackendKind::Postgrest),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub rest_url: Option<String>,
    pub service_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        Self::for_environment(environment).with_env_overrides()
    }

    /// Built-in defaults for `environment`, ignoring the process environment
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
    }

    fn with_env_overrides(mut self) -> Self {
        // Session overrides
        if let Ok(v) = env::var("SESSION_RESOLVE_TIMEOUT_MS") {
            self.session.resolve_timeout_ms = v.parse().unwrap_or(self.session.resolve_timeout_ms);
        }
        if let Ok(v) = env::var("SESSION_CALL_TIMEOUT_MS") {
            self.session.call_timeout_ms = v.parse().unwrap_or(self.session.call_timeout_ms);
        }
        if let Ok(v) = env::var("SESSION_RETRY_BACKOFF_MS") {
            self.session.retry_backoff_ms = v.parse().unwrap_or(self.session.retry_backoff_ms);
        }
        if let Ok(v) = env::var("SESSION_MAX_RETRIES") {
            self.session.max_retries = v.parse().unwrap_or(self.session.max_retries);
        }

        // Backend overrides
        if let Ok(v) = env::var("GATE_BACKEND") {
            self.backend.kind = v.parse().unwrap_or(self.backend.kind);
        }
        if let Ok(v) = env::var("GATE_REST_URL") {
            self.backend.rest_url = Some(v.trim_end_matches('/').to_string());
        }
        if let Ok(v) = env::var("GATE_SERVICE_KEY") {
            self.backend.service_key = Some(v);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // API overrides
        if let Some(v) = env::var("GATE_API_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("GATE_JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            session: SessionConfig {
                resolve_timeout_ms: 5_000,
                call_timeout_ms: 2_000,
                retry_backoff_ms: 200,
                max_retries: 1,
            },
            backend: BackendConfig {
                kind: BackendKind::Memory,
                rest_url: None,
                service_key: None,
            },
            database: DatabaseConfig {
                max_connections: 5,
                connection_timeout: 30,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["*".to_string()],
                jwt_secret: "dev-only-secret-change-me".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            session: SessionConfig {
                resolve_timeout_ms: 4_000,
                call_timeout_ms: 1_500,
                retry_backoff_ms: 250,
                max_retries: 1,
            },
            backend: BackendConfig {
                kind: BackendKind::Postgrest,
                rest_url: None,
                service_key: None,
            },
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 10,
            },
            api: ApiConfig {
                port: 8080,
                enable_request_logging: true,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://staging.solidunion.app".to_string()],
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            session: SessionConfig {
                resolve_timeout_ms: 3_000,
                call_timeout_ms: 1_000,
                retry_backoff_ms: 250,
                max_retries: 1,
            },
            backend: BackendConfig {
                kind: BackendKind::Postgrest,
                rest_url: None,
                service_key: None,
            },
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 5,
            },
            api: ApiConfig {
                port: 8080,
                enable_request_logging: false,
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["https://solidunion.app".to_string()],
                jwt_secret: String::new(),
                jwt_expiry_hours: 1,
            },
        }
    }
}

impl SessionConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}
