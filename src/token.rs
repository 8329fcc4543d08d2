use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{AuthError, Result};

/// Claims carried by tokens issued by the backend.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims<T = Value> {
    pub sub: Uuid,
    pub exp: i64,
    pub iat: i64,
    pub iss: Option<String>,
    pub aud: Option<String>,
    pub token_type: TokenType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Short-lived credential attached to authenticated requests.
///
/// Opaque to the client. `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl From<String> for AccessToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for AccessToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Token pair returned by login and refresh calls.
///
/// `refresh_token` is `None` when the backend chose not to rotate it; the
/// previously held refresh token stays valid in that case.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: AccessToken,
    pub refresh_token: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<AccessToken>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &self.access_token)
            .field("rotated", &self.refresh_token.is_some())
            .finish()
    }
}

/// Reads claims out of access tokens without verifying them.
///
/// The client never holds the signing secret, so the signature is not
/// checked. The result is only used to schedule refreshes early; the backend
/// stays the authority on whether a token is accepted.
pub struct TokenInspector {
    validation: Validation,
    key: DecodingKey,
}

impl Default for TokenInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenInspector {
    pub fn new() -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            validation,
            key: DecodingKey::from_secret(&[]),
        }
    }

    pub fn claims(&self, token: &AccessToken) -> Result<Claims<Value>> {
        let token_data = decode::<Claims<Value>>(token.as_str(), &self.key, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?;

        if token_data.claims.token_type != TokenType::Access {
            return Err(AuthError::InvalidToken);
        }

        Ok(token_data.claims)
    }

    /// Expiry of the token, `None` for opaque tokens.
    pub fn expires_at(&self, token: &AccessToken) -> Option<OffsetDateTime> {
        let claims = self.claims(token).ok()?;
        OffsetDateTime::from_unix_timestamp(claims.exp).ok()
    }

    pub fn session_id(&self, token: &AccessToken) -> Option<Uuid> {
        self.claims(token).ok().map(|claims| claims.sub)
    }

    /// Whether the token expires within `leeway` from now. Tokens with an
    /// unknown expiry never count as expiring.
    pub fn expires_within(&self, token: &AccessToken, leeway: Duration) -> bool {
        match self.expires_at(token) {
            Some(expiry) => expiry - OffsetDateTime::now_utc() <= leeway,
            None => false,
        }
    }
}
