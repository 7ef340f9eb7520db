pub mod auth;
pub mod response;

pub use auth::{bearer_token_middleware, require_bearer_middleware, BearerToken};
pub use response::{ApiResponse, ApiResult};
