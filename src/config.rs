use serde::{Deserialize, Serialize};
use time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Role a user must carry to hold an admin session
    pub admin_role: String,
    /// Upper bound on a single network refresh call
    pub refresh_timeout: Duration,
    /// Access tokens expiring within this window are refreshed before use
    pub refresh_leeway: Duration,
    pub proactive_refresh: bool,
    /// Where the route guard sends unauthenticated requests
    pub login_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            admin_role: "admin".to_string(),
            refresh_timeout: Duration::seconds(10),
            refresh_leeway: Duration::seconds(30),
            proactive_refresh: true,
            login_path: "/login".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn new(admin_role: String, refresh_timeout: Duration) -> Self {
        Self {
            admin_role,
            refresh_timeout,
            ..Self::default()
        }
    }

    pub fn with_admin_role(mut self, admin_role: String) -> Self {
        self.admin_role = admin_role;
        self
    }

    pub fn with_refresh_timeout(mut self, refresh_timeout: Duration) -> Self {
        self.refresh_timeout = refresh_timeout;
        self
    }

    pub fn with_refresh_leeway(mut self, refresh_leeway: Duration) -> Self {
        self.refresh_leeway = refresh_leeway;
        self
    }

    pub fn with_proactive_refresh(mut self, enabled: bool) -> Self {
        self.proactive_refresh = enabled;
        self
    }

    pub fn with_login_path(mut self, login_path: String) -> Self {
        self.login_path = login_path;
        self
    }

    /// Refresh timeout as a std duration for `tokio::time::timeout`.
    pub(crate) fn refresh_timeout_std(&self) -> std::time::Duration {
        self.refresh_timeout.unsigned_abs()
    }
}
