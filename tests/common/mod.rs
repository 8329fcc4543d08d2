#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::http::{Request, Response, StatusCode, header};
use jsonwebtoken::{EncodingKey, Header, encode};
use jwt_session_manager::prelude::*;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

pub const ADMIN_EMAIL: &str = "admin@shop.test";
pub const STAFF_EMAIL: &str = "clerk@shop.test";
pub const PASSWORD: &str = "correct-horse";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefreshBehavior {
    /// Issue a new access token and rotate the refresh token
    Rotate,
    /// Issue a new access token, keep the refresh token
    KeepRefreshToken,
    /// Reject every refresh as expired
    Reject,
    /// Succeed, but report the account as no longer admin
    Demote,
}

pub struct BackendState {
    pub refresh_calls: AtomicUsize,
    pub login_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    issued: AtomicUsize,
    refresh_delay: Mutex<std::time::Duration>,
    access_lifetime: Mutex<time::Duration>,
    behavior: Mutex<RefreshBehavior>,
    inline_user: AtomicBool,
    valid_refresh: Mutex<Option<String>>,
    valid_access: Mutex<Option<String>>,
}

/// In-memory stand-in for the backend's auth endpoints.
#[derive(Clone)]
pub struct TestBackend {
    pub state: Arc<BackendState>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(BackendState {
                refresh_calls: AtomicUsize::new(0),
                login_calls: AtomicUsize::new(0),
                logout_calls: AtomicUsize::new(0),
                profile_calls: AtomicUsize::new(0),
                issued: AtomicUsize::new(0),
                refresh_delay: Mutex::new(std::time::Duration::from_millis(20)),
                access_lifetime: Mutex::new(time::Duration::minutes(15)),
                behavior: Mutex::new(RefreshBehavior::Rotate),
                inline_user: AtomicBool::new(true),
                valid_refresh: Mutex::new(None),
                valid_access: Mutex::new(None),
            }),
        }
    }

    pub fn with_refresh_delay(self, delay: std::time::Duration) -> Self {
        *self.state.refresh_delay.lock().unwrap() = delay;
        self
    }

    pub fn with_access_lifetime(self, lifetime: time::Duration) -> Self {
        *self.state.access_lifetime.lock().unwrap() = lifetime;
        self
    }

    pub fn with_valid_refresh_token(self, refresh_token: &str) -> Self {
        *self.state.valid_refresh.lock().unwrap() = Some(refresh_token.to_string());
        self
    }

    /// Leave the user out of login/refresh responses so the profile
    /// endpoint has to be consulted.
    pub fn without_inline_user(self) -> Self {
        self.state.inline_user.store(false, Ordering::SeqCst);
        self
    }

    pub fn set_behavior(&self, behavior: RefreshBehavior) {
        *self.state.behavior.lock().unwrap() = behavior;
    }

    /// Make the backend reject every access token issued so far.
    pub fn expire_access_tokens(&self) {
        self.state.valid_access.lock().unwrap().take();
    }

    pub fn accepts(&self, access_token: &str) -> bool {
        self.state.valid_access.lock().unwrap().as_deref() == Some(access_token)
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.state.logout_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.state.profile_calls.load(Ordering::SeqCst)
    }

    fn issue_access(&self, user_id: &str) -> AccessToken {
        let serial = self.state.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let now = OffsetDateTime::now_utc();
        let lifetime = *self.state.access_lifetime.lock().unwrap();
        let claims = Claims::<Value> {
            sub: Uuid::new_v4(),
            exp: (now + lifetime).unix_timestamp(),
            iat: now.unix_timestamp(),
            iss: None,
            aud: None,
            token_type: TokenType::Access,
            session_data: Some(serde_json::json!({ "serial": serial })),
            user_id: Some(user_id.to_string()),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"backend-secret"),
        )
        .unwrap();
        *self.state.valid_access.lock().unwrap() = Some(token.clone());
        AccessToken::new(token)
    }

    fn issue_refresh(&self) -> String {
        let token = format!("refresh-{}", Uuid::new_v4());
        *self.state.valid_refresh.lock().unwrap() = Some(token.clone());
        token
    }

    fn inline(&self, user: User) -> Option<User> {
        self.state.inline_user.load(Ordering::SeqCst).then_some(user)
    }
}

pub fn admin() -> User {
    User::new("u-1", "admin").with_email(ADMIN_EMAIL)
}

pub fn staff() -> User {
    User::new("u-2", "staff").with_email(STAFF_EMAIL)
}

impl AuthBackend for TestBackend {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse> {
        self.state.login_calls.fetch_add(1, Ordering::SeqCst);
        if credentials.password != PASSWORD {
            return Err(AuthError::InvalidCredentials);
        }
        let user = match credentials.email.as_str() {
            ADMIN_EMAIL => admin(),
            STAFF_EMAIL => staff(),
            _ => return Err(AuthError::InvalidCredentials),
        };

        let tokens = TokenPair::new(self.issue_access(&user.id), Some(self.issue_refresh()));
        Ok(LoginResponse {
            tokens,
            user: self.inline(user),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse> {
        self.state.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.refresh_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        let behavior = *self.state.behavior.lock().unwrap();
        let known = self.state.valid_refresh.lock().unwrap().as_deref() == Some(refresh_token);
        if behavior == RefreshBehavior::Reject || !known {
            return Err(AuthError::RefreshFailed(
                "refresh token expired".to_string(),
            ));
        }

        let access_token = self.issue_access(&admin().id);
        let (refresh_token, user) = match behavior {
            RefreshBehavior::Rotate => (Some(self.issue_refresh()), self.inline(admin())),
            RefreshBehavior::KeepRefreshToken => (None, self.inline(admin())),
            RefreshBehavior::Demote => (Some(self.issue_refresh()), Some(staff())),
            RefreshBehavior::Reject => unreachable!(),
        };

        Ok(RefreshResponse {
            tokens: TokenPair::new(access_token, refresh_token),
            user,
        })
    }

    async fn logout(&self, refresh_token: &str) -> Result<()> {
        self.state.logout_calls.fetch_add(1, Ordering::SeqCst);
        let mut valid = self.state.valid_refresh.lock().unwrap();
        if valid.as_deref() == Some(refresh_token) {
            valid.take();
        }
        Ok(())
    }

    async fn profile(&self, access_token: &AccessToken) -> Result<User> {
        self.state.profile_calls.fetch_add(1, Ordering::SeqCst);
        if !self.accepts(access_token.as_str()) {
            return Err(AuthError::InvalidToken);
        }
        Ok(admin())
    }
}

/// Transport answering like a REST backend guarded by `TestBackend`'s
/// access tokens.
#[derive(Clone)]
pub struct TestTransport {
    backend: TestBackend,
    always_reject: Arc<AtomicBool>,
    latency: Arc<Mutex<HashMap<String, Duration>>>,
    pub seen_tokens: Arc<Mutex<Vec<Option<String>>>>,
}

impl TestTransport {
    pub fn new(backend: TestBackend) -> Self {
        Self {
            backend,
            always_reject: Arc::new(AtomicBool::new(false)),
            latency: Arc::new(Mutex::new(HashMap::new())),
            seen_tokens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn reject_everything(&self) {
        self.always_reject.store(true, Ordering::SeqCst);
    }

    /// Delay responses for `path`. The token is checked when the request
    /// arrives, so a slow response still reflects the token it was sent with.
    pub fn set_latency(&self, path: &str, delay: Duration) {
        self.latency.lock().unwrap().insert(path.to_string(), delay);
    }

    pub fn calls(&self) -> usize {
        self.seen_tokens.lock().unwrap().len()
    }
}

impl Transport for TestTransport {
    async fn send(&self, request: Request<String>) -> Result<Response<String>> {
        let token = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string);
        self.seen_tokens.lock().unwrap().push(token.clone());

        let authorized = !self.always_reject.load(Ordering::SeqCst)
            && token.as_deref().is_some_and(|t| self.backend.accepts(t));

        let (status, body) = if !authorized {
            (
                StatusCode::UNAUTHORIZED,
                r#"{"error":"token_expired"}"#.to_string(),
            )
        } else if request.uri().path() == "/broken" {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"error":"boom"}"#.to_string(),
            )
        } else {
            (
                StatusCode::OK,
                serde_json::json!({ "path": request.uri().path(), "items": [1, 2, 3] })
                    .to_string(),
            )
        };

        let delay = self.latency.lock().unwrap().get(request.uri().path()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(Response::builder().status(status).body(body).unwrap())
    }
}

/// Refresh token store whose writes land only after `save_delay`.
pub struct SlowSaveStore {
    slot: InMemoryRefreshTokenStore,
    save_delay: Duration,
}

impl SlowSaveStore {
    pub fn new(save_delay: Duration) -> Self {
        Self {
            slot: InMemoryRefreshTokenStore::new(),
            save_delay,
        }
    }

    pub fn current(&self) -> Option<String> {
        self.slot.current()
    }
}

impl RefreshTokenStore for SlowSaveStore {
    async fn load(&self) -> Result<Option<String>> {
        self.slot.load().await
    }

    async fn save(&self, refresh_token: &str) -> Result<()> {
        tokio::time::sleep(self.save_delay).await;
        self.slot.save(refresh_token).await
    }

    async fn clear(&self) -> Result<()> {
        self.slot.clear().await
    }
}

pub fn credentials(email: &str) -> Credentials {
    Credentials::new(email, PASSWORD)
}

pub fn config() -> SessionConfig {
    SessionConfig::default()
}
