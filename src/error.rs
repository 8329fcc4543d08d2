use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Error response returned to clients
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: &'static str,
    /// Human-readable error message
    pub message: &'static str,
}

/// Every failure the session core can surface.
///
/// `Clone` so a single refresh outcome can be handed to every waiter of a
/// refresh round.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account role `{role}` is not allowed to use the admin dashboard")]
    InsufficientRole { role: String },

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Request still unauthorized after token refresh (status {status})")]
    RequestRetryExhausted { status: u16, body: String },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend returned status {status}")]
    Backend { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// True for the outcomes that leave the caller without a usable session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            AuthError::RefreshFailed(_)
                | AuthError::RequestRetryExhausted { .. }
                | AuthError::NotAuthenticated
                | AuthError::InvalidToken
        )
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::Serialization(e.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid credentials"),
            AuthError::InsufficientRole { .. } => {
                (StatusCode::FORBIDDEN, "Admin role required for this dashboard")
            }
            AuthError::RefreshFailed(_) => (StatusCode::UNAUTHORIZED, "Session expired"),
            AuthError::RequestRetryExhausted { .. } => {
                (StatusCode::UNAUTHORIZED, "Request unauthorized after refresh")
            }
            AuthError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "Not authenticated"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::Transport(_) => (StatusCode::BAD_GATEWAY, "Backend unreachable"),
            AuthError::Backend { .. } => (StatusCode::BAD_GATEWAY, "Backend error"),
            AuthError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Serialization error")
            }
            AuthError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Storage error"),
        };

        let error_response = ErrorResponse {
            error: match self {
                AuthError::InvalidCredentials => "invalid_credentials",
                AuthError::InsufficientRole { .. } => "insufficient_role",
                AuthError::RefreshFailed(_) => "refresh_failed",
                AuthError::RequestRetryExhausted { .. } => "request_retry_exhausted",
                AuthError::NotAuthenticated => "not_authenticated",
                AuthError::InvalidToken => "invalid_token",
                AuthError::Transport(_) => "transport_error",
                AuthError::Backend { .. } => "backend_error",
                AuthError::Serialization(_) => "serialization_error",
                AuthError::Storage(_) => "storage_error",
            },
            message,
        };

        (status, axum::Json(error_response)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
