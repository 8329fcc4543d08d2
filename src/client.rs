use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, header};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    backend::AuthBackend,
    error::{AuthError, Result},
    manager::SessionManager,
    storage::{MemoryOnly, RefreshTokenStore},
    token::AccessToken,
};

/// Outbound API call, kept separate from the wire request so it can be
/// re-issued with a different token.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the client's base URL, including any query string
    /// (`/orders?status=open`), already percent-encoded
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post<T: Serialize>(path: impl Into<String>, body: &T) -> Result<Self> {
        Self::new(Method::POST, path).with_json(body)
    }

    pub fn put<T: Serialize>(path: impl Into<String>, body: &T) -> Result<Self> {
        Self::new(Method::PUT, path).with_json(body)
    }

    pub fn patch<T: Serialize>(path: impl Into<String>, body: &T) -> Result<Self> {
        Self::new(Method::PATCH, path).with_json(body)
    }

    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Render the wire request, attaching `token` as a bearer credential.
    pub fn to_http(&self, base_url: &str, token: Option<&AccessToken>) -> Result<Request<String>> {
        let uri = format!("{}{}", base_url.trim_end_matches('/'), self.path);
        let mut builder = Request::builder().method(self.method.clone()).uri(uri);

        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers.clone());
        }
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, token.bearer());
        }

        let body = match &self.body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                serde_json::to_string(body)?
            }
            None => String::new(),
        };

        builder
            .body(body)
            .map_err(|e| AuthError::Transport(e.to_string()))
    }
}

/// Sends wire requests to the backend.
///
/// Implementations report connection-level problems as
/// [`AuthError::Transport`] and return every HTTP response, including
/// error statuses, as `Ok`.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: Request<String>,
    ) -> impl std::future::Future<Output = Result<Response<String>>> + Send;
}

/// API client that attaches the session's token and recovers from
/// authorization failures with a single refresh-and-retry.
pub struct ApiClient<T, B, S = MemoryOnly> {
    transport: T,
    session: SessionManager<B, S>,
    base_url: String,
}

impl<T: Clone, B, S> Clone for ApiClient<T, B, S> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            session: self.session.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

impl<T, B, S> ApiClient<T, B, S>
where
    T: Transport,
    B: AuthBackend,
    S: RefreshTokenStore,
{
    pub fn new(transport: T, session: SessionManager<B, S>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            session,
            base_url: base_url.into(),
        }
    }

    pub fn session(&self) -> &SessionManager<B, S> {
        &self.session
    }

    /// Send `request`, retrying it at most once after a `401`.
    ///
    /// If the session already holds a newer token than the one rejected, the
    /// retry uses it without refreshing again. Otherwise the retry waits on
    /// the shared refresh. A request sent without a token is not retried. If
    /// the refresh fails, or the retried request is rejected again, the
    /// result is [`AuthError::RequestRetryExhausted`] carrying the backend's
    /// rejection.
    pub async fn send(&self, request: &ApiRequest) -> Result<Response<String>> {
        let token = self.current_token().await?;
        let response = self.dispatch(request, token.as_ref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // Nothing to refresh for a request that carried no credential
        let Some(sent) = token else {
            return Err(retry_exhausted(response));
        };

        let fresh = match self.session.access_token() {
            // A round that finished while this request was in flight already
            // replaced the rejected token.
            Some(current) if current != sent => {
                debug!(method = %request.method, path = %request.path, "request unauthorized, retrying with newer token");
                current
            }
            _ => {
                debug!(method = %request.method, path = %request.path, "request unauthorized, refreshing token");
                match self.session.ensure_fresh_token().await {
                    Ok(token) => token,
                    Err(e) => {
                        warn!(method = %request.method, path = %request.path, error = %e, "refresh failed, not retrying request");
                        return Err(retry_exhausted(response));
                    }
                }
            }
        };

        let retried = self.dispatch(request, Some(&fresh)).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!(method = %request.method, path = %request.path, "request rejected again with a fresh token");
            return Err(retry_exhausted(retried));
        }
        Ok(retried)
    }

    /// Send `request` and decode a successful JSON response.
    pub async fn execute<R: DeserializeOwned>(&self, request: &ApiRequest) -> Result<R> {
        let response = self.send(request).await?;
        let status = response.status();
        let body = response.into_body();

        if !status.is_success() {
            return Err(AuthError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let body = if body.trim().is_empty() {
            "null"
        } else {
            body.as_str()
        };
        Ok(serde_json::from_str(body)?)
    }

    async fn current_token(&self) -> Result<Option<AccessToken>> {
        if !self.session.config().proactive_refresh {
            return Ok(self.session.access_token());
        }
        match self.session.valid_access_token().await {
            Ok(token) => Ok(Some(token)),
            Err(AuthError::NotAuthenticated) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&AccessToken>,
    ) -> Result<Response<String>> {
        let wire = request.to_http(&self.base_url, token)?;
        self.transport.send(wire).await
    }
}

fn retry_exhausted(response: Response<String>) -> AuthError {
    AuthError::RequestRetryExhausted {
        status: response.status().as_u16(),
        body: response.into_body(),
    }
}
