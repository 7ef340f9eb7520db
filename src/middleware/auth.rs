use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;

/// Raw bearer token from the `Authorization` header, if any.
///
/// Verification is left to the identity provider so that an absent or bad
/// token resolves to "signed out" rather than an error.
#[derive(Clone, Debug, Default)]
pub struct BearerToken(pub Option<String>);

/// Attach the bearer token (possibly none) to the request extensions
pub async fn bearer_token_middleware(headers: HeaderMap, mut request: Request, next: Next) -> Response {
    let token = extract_bearer_from_headers(&headers).ok();
    request.extensions_mut().insert(BearerToken(token));
    next.run(request).await
}

/// Reject requests that carry no usable `Authorization: Bearer` header
pub async fn require_bearer_middleware(
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_from_headers(&headers).map_err(|msg| {
        tracing::debug!("Rejecting request: {}", msg);
        ApiError::unauthorized("No auth header provided")
    })?;

    request.extensions_mut().insert(BearerToken(Some(token)));
    Ok(next.run(request).await)
}

/// Extract the bearer token from the Authorization header
pub fn extract_bearer_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        let token = token.trim();
        if token.is_empty() {
            return Err("Empty bearer token".to_string());
        }
        Ok(token.to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(extract_bearer_from_headers(&headers("Bearer abc.def")).unwrap(), "abc.def");
    }

    #[test]
    fn rejects_missing_empty_and_basic() {
        assert!(extract_bearer_from_headers(&HeaderMap::new()).is_err());
        assert!(extract_bearer_from_headers(&headers("Bearer   ")).is_err());
        assert!(extract_bearer_from_headers(&headers("Basic dXNlcg==")).is_err());
    }
}
