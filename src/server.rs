use std::sync::Arc;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::backend::token::TokenAuthority;
use crate::config::{AppConfig, SecurityConfig};
use crate::handlers::{functions, public, session};
use crate::middleware::{bearer_token_middleware, require_bearer_middleware, BearerToken};
use crate::session::{IdentityProvider, ProfileStore, ResolverConfig, SessionContext};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<SessionContext>,
    pub authority: Arc<TokenAuthority>,
}

impl AppState {
    /// Must be called from within a tokio runtime (spawns the session listener).
    pub fn new(store: Arc<dyn ProfileStore>, config: &AppConfig) -> Self {
        let authority = Arc::new(TokenAuthority::new(config.security.jwt_secret.clone()));
        let ctx = SessionContext::init(
            authority.subscribe(),
            store,
            ResolverConfig::from(&config.session),
        );
        Self { ctx, authority }
    }

    /// Identity provider for the caller behind `bearer`
    pub fn identity(&self, bearer: &BearerToken) -> Arc<dyn IdentityProvider> {
        Arc::new(self.authority.bind(bearer.0.clone()))
    }
}

pub fn build_router(state: AppState, config: &AppConfig) -> Router {
    let session_routes = Router::new()
        .route("/api/session/resolve", get(session::resolve))
        .route("/api/session/landing", get(session::landing))
        .route("/api/session", delete(session::sign_out))
        .route_layer(middleware::from_fn(bearer_token_middleware));

    let function_routes = Router::new()
        .route("/functions/set-role", post(functions::set_role))
        .route_layer(middleware::from_fn(require_bearer_middleware));

    let mut app = Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .merge(session_routes)
        .merge(function_routes)
        .with_state(state);

    if config.security.enable_cors {
        app = app.layer(cors_layer(&config.security));
    }
    if config.api.enable_request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }
    app
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ]);

    if security.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{generate_jwt, Claims};
    use crate::backend::memory::MemoryProfileStore;
    use crate::config::Environment;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::for_environment(Environment::Development);
        config.security.jwt_secret = "router-test-secret".to_string();
        config
    }

    fn bearer(config: &AppConfig, user_id: Uuid) -> String {
        let claims = Claims::new(user_id, "router@example.com", chrono::Duration::hours(1));
        format!("Bearer {}", generate_jwt(&claims, &config.security.jwt_secret).unwrap())
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn app(config: &AppConfig) -> Router {
        let state = AppState::new(Arc::new(MemoryProfileStore::new()), config);
        build_router(state, config)
    }

    #[tokio::test]
    async fn resolve_without_token_redirects_to_login() {
        let config = test_config();
        let response = app(&config)
            .oneshot(Request::get("/api/session/resolve").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["decision"], "redirect");
        assert_eq!(body["data"]["path"], "/login");
    }

    #[tokio::test]
    async fn set_role_requires_bearer() {
        let config = test_config();
        let response = app(&config)
            .oneshot(
                Request::post("/functions/set-role")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"role":"buyer"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["message"], "No auth header provided");
    }

    #[tokio::test]
    async fn set_role_then_resolve_renders() {
        let config = test_config();
        let app = app(&config);
        let auth = bearer(&config, Uuid::new_v4());

        let response = app
            .clone()
            .oneshot(
                Request::post("/functions/set-role")
                    .header("authorization", &auth)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"role":"landlord"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Role updated");
        assert_eq!(body["profile"]["role"], "landlord");
        assert_eq!(body["next"]["path"], "/landlord-dashboard");

        let response = app
            .oneshot(
                Request::get("/api/session/resolve?role=landlord")
                    .header("authorization", &auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["data"]["decision"], "render");
    }

    #[tokio::test]
    async fn unknown_required_role_is_bad_request() {
        let config = test_config();
        let response = app(&config)
            .oneshot(
                Request::get("/api/session/resolve?role=wizard")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
