use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension,
};
use serde::Deserialize;

use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, BearerToken};
use crate::server::AppState;
use crate::types::{RoleTag, RoutingDecision, LOGIN_PATH};

#[derive(Debug, Default, Deserialize)]
pub struct ResolveQuery {
    pub role: Option<String>,
}

impl ResolveQuery {
    fn required_role(&self) -> Result<Option<RoleTag>, ApiError> {
        let Some(raw) = self.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(None);
        };
        let role = raw
            .parse::<RoleTag>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        if role.is_unset() {
            return Err(ApiError::bad_request("A guard cannot require the unset role"));
        }
        Ok(Some(role))
    }
}

/// Failed resolutions are still answered with the decision, but as 503
fn decision_response(decision: RoutingDecision) -> ApiResponse<RoutingDecision> {
    if decision.is_failed() {
        ApiResponse::with_status(decision, StatusCode::SERVICE_UNAVAILABLE)
    } else {
        ApiResponse::success(decision)
    }
}

/// GET /api/session/resolve?role=<role>
pub async fn resolve(
    State(state): State<AppState>,
    Extension(bearer): Extension<BearerToken>,
    Query(query): Query<ResolveQuery>,
) -> ApiResult<RoutingDecision> {
    let required = query.required_role()?;
    let decision = state.ctx.resolve(state.identity(&bearer), required).await;
    Ok(decision_response(decision))
}

/// GET /api/session/landing
pub async fn landing(
    State(state): State<AppState>,
    Extension(bearer): Extension<BearerToken>,
) -> ApiResult<RoutingDecision> {
    let decision = state.ctx.resolve_landing(state.identity(&bearer)).await;
    Ok(decision_response(decision))
}

/// DELETE /api/session - sign out; succeeds even without a live session
pub async fn sign_out(
    State(state): State<AppState>,
    Extension(bearer): Extension<BearerToken>,
) -> ApiResult<RoutingDecision> {
    state.ctx.sign_out(state.identity(&bearer)).await?;
    Ok(ApiResponse::success(RoutingDecision::redirect(LOGIN_PATH)))
}
