use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    session::User,
    token::{AccessToken, TokenPair},
};

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub tokens: TokenPair,
    /// Some backends return the profile inline; otherwise it is fetched.
    pub user: Option<User>,
}

#[derive(Debug, Clone)]
pub struct RefreshResponse {
    pub tokens: TokenPair,
    pub user: Option<User>,
}

/// Authentication endpoints of the backend API.
///
/// Usually backed by the generated SDK. Implementations map a rejected login
/// to [`AuthError::InvalidCredentials`](crate::AuthError::InvalidCredentials)
/// and any refresh problem (invalid, expired or revoked refresh token,
/// network failure) to [`AuthError::RefreshFailed`](crate::AuthError::RefreshFailed).
///
/// # Example Implementation
///
/// ```rust
/// use jwt_session_manager::{
///     AuthBackend, AuthError, Credentials, LoginResponse, RefreshResponse, Result, TokenPair,
///     User, token::AccessToken,
/// };
///
/// struct FixedBackend;
///
/// impl AuthBackend for FixedBackend {
///     async fn login(&self, credentials: &Credentials) -> Result<LoginResponse> {
///         if credentials.password != "hunter2" {
///             return Err(AuthError::InvalidCredentials);
///         }
///         Ok(LoginResponse {
///             tokens: TokenPair::new("access-1", Some("refresh-1".to_string())),
///             user: Some(User::new("1", "admin")),
///         })
///     }
///
///     async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse> {
///         if refresh_token != "refresh-1" {
///             return Err(AuthError::RefreshFailed("unknown refresh token".to_string()));
///         }
///         Ok(RefreshResponse {
///             tokens: TokenPair::new("access-2", None),
///             user: None,
///         })
///     }
///
///     async fn logout(&self, _refresh_token: &str) -> Result<()> {
///         Ok(())
///     }
///
///     async fn profile(&self, _access_token: &AccessToken) -> Result<User> {
///         Ok(User::new("1", "admin"))
///     }
/// }
/// ```
pub trait AuthBackend: Send + Sync {
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl std::future::Future<Output = Result<LoginResponse>> + Send;

    /// Exchange a refresh token for a new access token (and possibly a
    /// rotated refresh token).
    fn refresh(
        &self,
        refresh_token: &str,
    ) -> impl std::future::Future<Output = Result<RefreshResponse>> + Send;

    /// Revoke the refresh token on the backend.
    fn logout(&self, refresh_token: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    fn profile(
        &self,
        access_token: &AccessToken,
    ) -> impl std::future::Future<Output = Result<User>> + Send;
}
