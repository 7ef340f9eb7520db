use axum::{
    extract::{rejection::JsonRejection, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use crate::middleware::BearerToken;
use crate::server::AppState;
use crate::types::{Profile, RoleTag, RoutingDecision};

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SetRoleResponse {
    pub message: &'static str,
    pub profile: Profile,
    /// Where the user should go now that the role is recorded
    pub next: RoutingDecision,
}

/// POST /functions/set-role
///
/// Expected Input:
/// ```json
/// { "role": "buyer" }
/// ```
///
/// Expected Output:
/// ```json
/// {
///   "message": "Role updated",
///   "profile": { "id": "...", "email": "...", "role": "buyer", ... },
///   "next": { "decision": "redirect", "path": "/buyer-dashboard" }
/// }
/// ```
pub async fn set_role(
    State(state): State<AppState>,
    Extension(bearer): Extension<BearerToken>,
    payload: Result<Json<SetRoleRequest>, JsonRejection>,
) -> Result<Json<SetRoleResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::invalid_json(e.body_text()))?;

    let role = request
        .role
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("Invalid role"))?
        .parse::<RoleTag>()
        .map_err(|_| ApiError::bad_request("Invalid role"))?;

    let (profile, next) = state
        .ctx
        .choose_role_and_resolve(state.identity(&bearer), role)
        .await?;
    debug!("User {} chose role {}", profile.user_id, profile.role);

    Ok(Json(SetRoleResponse {
        message: "Role updated",
        profile,
        next,
    }))
}
