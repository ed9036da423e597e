mod bearer_auth;
mod request_id;
mod user_info;

pub use bearer_auth::{verify_token_middleware, TokenVerifier};
pub use request_id::{request_id_middleware, CorrelationId, X_CORRELATION_ID};
pub use user_info::{AuthUser, X_USER_INFO};
