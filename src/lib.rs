pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod extractors;
pub mod manager;
pub mod middleware;
pub mod session;
pub mod storage;
pub mod token;

pub use backend::{AuthBackend, Credentials, LoginResponse, RefreshResponse};
pub use client::{ApiClient, ApiRequest, Transport};
pub use config::SessionConfig;
pub use error::{AuthError, Result};
pub use extractors::{AdminUser, OptionalAdminUser};
pub use manager::SessionManager;
pub use middleware::require_admin;
pub use session::{AuthStatus, Session, SignOutReason, User};
pub use storage::{InMemoryRefreshTokenStore, MemoryOnly, RefreshTokenStore};
pub use token::{AccessToken, Claims, TokenInspector, TokenPair, TokenType};

pub mod prelude {
    pub use crate::{
        backend::{AuthBackend, Credentials, LoginResponse, RefreshResponse},
        client::{ApiClient, ApiRequest, Transport},
        config::SessionConfig,
        error::{AuthError, Result},
        extractors::{AdminUser, OptionalAdminUser},
        manager::SessionManager,
        middleware::require_admin,
        session::{AuthStatus, Session, SignOutReason, User},
        storage::{InMemoryRefreshTokenStore, MemoryOnly, RefreshTokenStore},
        token::{AccessToken, Claims, TokenInspector, TokenPair, TokenType},
    };
}
