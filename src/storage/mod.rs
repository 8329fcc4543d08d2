use std::sync::{Mutex, PoisonError};

use crate::error::Result;

/// Optional persistence hook for the refresh token.
///
/// The session itself lives only in memory. Whether the refresh token
/// survives a restart is the caller's decision: wire in a store that writes
/// somewhere durable and [`SessionManager::restore`](crate::SessionManager::restore)
/// will use it for a silent refresh. The default [`MemoryOnly`] keeps nothing.
///
/// Backends that can fail report it as [`AuthError::Storage`](crate::AuthError::Storage).
/// The manager logs store failures and carries on with the in-memory session.
///
/// # Example Implementation
///
/// ```rust
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use tokio::sync::RwLock;
/// use jwt_session_manager::{RefreshTokenStore, Result};
///
/// struct KeyValueStore {
///     entries: Arc<RwLock<HashMap<String, String>>>,
/// }
///
/// impl RefreshTokenStore for KeyValueStore {
///     async fn load(&self) -> Result<Option<String>> {
///         Ok(self.entries.read().await.get("refresh_token").cloned())
///     }
///
///     async fn save(&self, refresh_token: &str) -> Result<()> {
///         self.entries
///             .write()
///             .await
///             .insert("refresh_token".to_string(), refresh_token.to_string());
///         Ok(())
///     }
///
///     async fn clear(&self) -> Result<()> {
///         self.entries.write().await.remove("refresh_token");
///         Ok(())
///     }
/// }
/// ```
pub trait RefreshTokenStore: Send + Sync {
    fn load(&self) -> impl std::future::Future<Output = Result<Option<String>>> + Send;

    fn save(&self, refresh_token: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    fn clear(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Store that persists nothing: a restart always starts signed out.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryOnly;

impl RefreshTokenStore for MemoryOnly {
    async fn load(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn save(&self, _refresh_token: &str) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}

/// Keeps the refresh token in a process-local slot that outlives any single
/// manager, e.g. across navigations that rebuild the manager.
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenStore {
    slot: Mutex<Option<String>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(refresh_token: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(refresh_token.into())),
        }
    }

    pub fn current(&self) -> Option<String> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.current())
    }

    async fn save(&self, refresh_token: &str) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(refresh_token.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

impl<T: RefreshTokenStore> RefreshTokenStore for std::sync::Arc<T> {
    async fn load(&self) -> Result<Option<String>> {
        self.as_ref().load().await
    }

    async fn save(&self, refresh_token: &str) -> Result<()> {
        self.as_ref().save(refresh_token).await
    }

    async fn clear(&self) -> Result<()> {
        self.as_ref().clear().await
    }
}
