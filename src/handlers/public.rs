use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::server::AppState;

/// GET / - service description
pub async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "SolidUnion Gate",
            "version": version,
            "description": "Session and role resolution for guarded marketplace routes",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "resolve": "GET /api/session/resolve?role=<role> (bearer optional)",
                "landing": "GET /api/session/landing (bearer optional)",
                "sign_out": "DELETE /api/session (bearer optional)",
                "set_role": "POST /functions/set-role (bearer required)",
            }
        }
    }))
}

/// GET /health - liveness plus a profile backend probe
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.ctx.store().health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "backend": "ok"
                }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "profile backend unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "backend_error": e.to_string()
                }
            })),
        ),
    }
}
