use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use tokio::sync::{Mutex as AsyncMutex, oneshot, watch};
use tracing::{debug, info, warn};

use crate::{
    backend::{AuthBackend, Credentials, RefreshResponse},
    config::SessionConfig,
    error::{AuthError, Result},
    session::{AuthStatus, Session, SignOutReason, User},
    storage::{MemoryOnly, RefreshTokenStore},
    token::{AccessToken, TokenInspector, TokenPair},
};

type RefreshOutcome = Result<AccessToken>;
type Waiter = oneshot::Sender<RefreshOutcome>;

enum RefreshState {
    Idle,
    Pending { round: u64, waiters: Vec<Waiter> },
}

struct RefreshSlot {
    state: RefreshState,
    rounds: u64,
}

impl RefreshSlot {
    /// End the pending round, if any, handing back its waiters. A leader
    /// that finishes later finds its round gone and discards its result.
    fn retire(&mut self) -> Vec<Waiter> {
        match std::mem::replace(&mut self.state, RefreshState::Idle) {
            RefreshState::Pending { round, waiters } => {
                debug!(round, waiters = waiters.len(), "retiring pending token refresh");
                waiters
            }
            RefreshState::Idle => Vec::new(),
        }
    }

    /// Take the waiters of `round` if it is still the pending one.
    fn complete(&mut self, round: u64) -> Option<Vec<Waiter>> {
        match std::mem::replace(&mut self.state, RefreshState::Idle) {
            RefreshState::Pending {
                round: pending,
                waiters,
            } if pending == round => Some(waiters),
            other => {
                self.state = other;
                None
            }
        }
    }
}

enum Role {
    Leader(u64),
    Follower(oneshot::Receiver<RefreshOutcome>),
}

struct Inner<B, S> {
    backend: B,
    store: S,
    config: SessionConfig,
    inspector: TokenInspector,
    session: ArcSwap<Session>,
    refresh: Mutex<RefreshSlot>,
    status: watch::Sender<AuthStatus>,
    /// Serializes store writes so the store ends up mirroring the latest session.
    store_sync: AsyncMutex<()>,
}

impl<B, S> Inner<B, S> {
    fn lock_refresh(&self) -> MutexGuard<'_, RefreshSlot> {
        self.refresh.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, status: AuthStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Replace the session with an empty one. Must be called with the
    /// refresh slot locked. Returns the refresh token that was held.
    fn wipe(&self, status: AuthStatus) -> Option<String> {
        let previous = self.session.swap(Arc::new(Session::default()));
        self.publish(status);
        previous.refresh_token.clone()
    }

    fn abandon_round(&self, round: u64) {
        let waiters = self.lock_refresh().complete(round);
        if let Some(waiters) = waiters {
            warn!(round, waiters = waiters.len(), "token refresh abandoned before completion");
            release(
                waiters,
                Err(AuthError::RefreshFailed("refresh abandoned".to_string())),
            );
        }
    }
}

fn release(waiters: Vec<Waiter>, outcome: RefreshOutcome) {
    for waiter in waiters {
        // A follower that stopped waiting is not an error.
        let _ = waiter.send(outcome.clone());
    }
}

/// Releases the round's waiters if the leader future is dropped mid-flight.
struct RoundGuard<'a, B, S> {
    inner: &'a Inner<B, S>,
    round: u64,
    armed: bool,
}

impl<B, S> Drop for RoundGuard<'_, B, S> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.abandon_round(self.round);
        }
    }
}

/// Owns the admin session and coordinates token refreshes.
///
/// The manager is a cheap handle: clone it into every request path that
/// needs a token. All mutation of the session goes through its methods;
/// readers only ever see a complete snapshot.
///
/// Concurrent callers of [`ensure_fresh_token`](Self::ensure_fresh_token)
/// share one network refresh: the first caller leads the round, everyone
/// arriving while it is pending waits for the same outcome.
pub struct SessionManager<B, S = MemoryOnly> {
    inner: Arc<Inner<B, S>>,
}

impl<B, S> Clone for SessionManager<B, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: AuthBackend> SessionManager<B, MemoryOnly> {
    pub fn new(backend: B, config: SessionConfig) -> Self {
        Self::with_store(backend, MemoryOnly, config)
    }
}

impl<B: AuthBackend, S: RefreshTokenStore> SessionManager<B, S> {
    pub fn with_store(backend: B, store: S, config: SessionConfig) -> Self {
        let (status, _) = watch::channel(AuthStatus::Unauthenticated);
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                config,
                inspector: TokenInspector::new(),
                session: ArcSwap::from_pointee(Session::default()),
                refresh: Mutex::new(RefreshSlot {
                    state: RefreshState::Idle,
                    rounds: 0,
                }),
                status,
                store_sync: AsyncMutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Current access token. Never blocks and never refreshes.
    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.session.load().access_token.clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.session.load().user.clone()
    }

    /// Snapshot of the whole session.
    pub fn session(&self) -> Session {
        Session::clone(&self.inner.session.load())
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.session.load().is_authenticated()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.inner.status.subscribe()
    }

    /// Atomically install a new session.
    ///
    /// A refresh round pending at this point is retired: its waiters get the
    /// newly installed token and the round's own result is discarded.
    pub fn set_session(&self, tokens: TokenPair, user: User) {
        let access_token = tokens.access_token;
        let waiters = {
            let mut slot = self.inner.lock_refresh();
            self.inner.session.store(Arc::new(Session {
                access_token: Some(access_token.clone()),
                refresh_token: tokens.refresh_token,
                user: Some(user.clone()),
            }));
            self.inner.publish(AuthStatus::Authenticated { user });
            slot.retire()
        };
        release(waiters, Ok(access_token));
    }

    /// Drop all session fields. Waiters of a pending refresh are released
    /// with a failure.
    pub fn clear_session(&self) {
        self.clear_with(AuthStatus::Unauthenticated);
    }

    fn clear_with(&self, status: AuthStatus) -> Option<String> {
        let (refresh_token, waiters) = {
            let mut slot = self.inner.lock_refresh();
            let refresh_token = self.inner.wipe(status);
            (refresh_token, slot.retire())
        };
        release(
            waiters,
            Err(AuthError::RefreshFailed("session cleared".to_string())),
        );
        refresh_token
    }

    /// Obtain a new access token, sharing one network refresh among all
    /// concurrent callers.
    ///
    /// On success the session holds the new token and every caller of the
    /// round receives it. On failure the session is cleared and every caller
    /// receives the same [`AuthError::RefreshFailed`]. Once a round resolves
    /// the next caller starts a new one.
    pub async fn ensure_fresh_token(&self) -> Result<AccessToken> {
        match self.join_or_lead() {
            Role::Follower(receiver) => receiver.await.unwrap_or_else(|_| {
                Err(AuthError::RefreshFailed("refresh abandoned".to_string()))
            }),
            Role::Leader(round) => self.lead_refresh(round).await,
        }
    }

    fn join_or_lead(&self) -> Role {
        let mut slot = self.inner.lock_refresh();
        if let RefreshState::Pending { round, waiters } = &mut slot.state {
            let (sender, receiver) = oneshot::channel();
            waiters.push(sender);
            debug!(
                round = *round,
                position = waiters.len(),
                "waiting on pending token refresh"
            );
            return Role::Follower(receiver);
        }

        slot.rounds += 1;
        let round = slot.rounds;
        slot.state = RefreshState::Pending {
            round,
            waiters: Vec::new(),
        };
        Role::Leader(round)
    }

    async fn lead_refresh(&self, round: u64) -> Result<AccessToken> {
        let mut guard = RoundGuard {
            inner: self.inner.as_ref(),
            round,
            armed: true,
        };
        let result = self.request_refresh(round).await;
        guard.armed = false;

        let (outcome, store_dirty) = self.finish_round(round, result);
        if store_dirty {
            self.sync_store().await;
        }
        outcome
    }

    async fn request_refresh(&self, round: u64) -> Result<(RefreshResponse, String)> {
        let refresh_token = self.inner.session.load().refresh_token.clone();
        let Some(refresh_token) = refresh_token else {
            debug!(round, "no refresh token held, cannot refresh");
            return Err(AuthError::RefreshFailed("no refresh token".to_string()));
        };

        info!(round, "refreshing access token");
        let timeout = self.inner.config.refresh_timeout_std();
        match tokio::time::timeout(timeout, self.inner.backend.refresh(&refresh_token)).await {
            Ok(Ok(response)) => Ok((response, refresh_token)),
            Ok(Err(AuthError::RefreshFailed(reason))) => Err(AuthError::RefreshFailed(reason)),
            Ok(Err(e)) => Err(AuthError::RefreshFailed(e.to_string())),
            Err(_) => Err(AuthError::RefreshFailed(format!(
                "refresh timed out after {timeout:?}"
            ))),
        }
    }

    fn finish_round(
        &self,
        round: u64,
        result: Result<(RefreshResponse, String)>,
    ) -> (RefreshOutcome, bool) {
        let admin_role = &self.inner.config.admin_role;
        let (outcome, store_dirty, waiters) = {
            let mut slot = self.inner.lock_refresh();
            let Some(waiters) = slot.complete(round) else {
                drop(slot);
                debug!(round, "refresh round retired before completion, discarding result");
                let outcome = self.access_token().ok_or_else(|| {
                    AuthError::RefreshFailed("session cleared during refresh".to_string())
                });
                return (outcome, false);
            };

            let (outcome, store_dirty) = match result {
                Ok((response, previous_refresh)) => match response.user {
                    Some(user) if &user.role != admin_role => {
                        warn!(round, user_id = %user.id, role = %user.role, "account lost admin role, ending session");
                        self.inner.wipe(AuthStatus::SignedOut {
                            reason: SignOutReason::InsufficientRole,
                        });
                        (
                            Err(AuthError::InsufficientRole { role: user.role }),
                            true,
                        )
                    }
                    user => {
                        let current = self.inner.session.load_full();
                        let user = user.or_else(|| current.user.clone());
                        let rotated = response.tokens.refresh_token;
                        let access_token = response.tokens.access_token;

                        self.inner.session.store(Arc::new(Session {
                            access_token: Some(access_token.clone()),
                            refresh_token: Some(rotated.clone().unwrap_or(previous_refresh)),
                            user: user.clone(),
                        }));
                        if let Some(user) = user {
                            self.inner.publish(AuthStatus::Authenticated { user });
                        }
                        info!(
                            round,
                            waiters = waiters.len(),
                            rotated = rotated.is_some(),
                            session_id = ?self.inner.inspector.session_id(&access_token),
                            "access token refreshed"
                        );
                        (Ok(access_token), rotated.is_some())
                    }
                },
                Err(e) => {
                    warn!(round, waiters = waiters.len(), error = %e, "token refresh failed, clearing session");
                    self.inner.wipe(AuthStatus::SignedOut {
                        reason: SignOutReason::RefreshFailed,
                    });
                    (Err(e), true)
                }
            };
            (outcome, store_dirty, waiters)
        };

        release(waiters, outcome.clone());
        (outcome, store_dirty)
    }

    /// Current token, refreshed first when it is about to expire.
    ///
    /// Without an access token but with a refresh token (after
    /// [`restore`](Self::restore) seeded one) this refreshes as well.
    pub async fn valid_access_token(&self) -> Result<AccessToken> {
        let session = self.inner.session.load_full();
        match &session.access_token {
            Some(token)
                if self.inner.config.proactive_refresh
                    && self
                        .inner
                        .inspector
                        .expires_within(token, self.inner.config.refresh_leeway) =>
            {
                debug!("access token close to expiry, refreshing early");
                self.ensure_fresh_token().await
            }
            Some(token) => Ok(token.clone()),
            None if session.refresh_token.is_some() => self.ensure_fresh_token().await,
            None => Err(AuthError::NotAuthenticated),
        }
    }

    /// Sign in and establish an admin session.
    ///
    /// Accounts without the admin role are refused with
    /// [`AuthError::InsufficientRole`]; their tokens are never installed.
    /// Neither that nor [`AuthError::InvalidCredentials`] touches a session
    /// that already exists.
    pub async fn login(&self, credentials: &Credentials) -> Result<User> {
        let response = self.inner.backend.login(credentials).await.inspect_err(|e| {
            warn!(email = %credentials.email, error = %e, "login rejected");
        })?;

        let user = match response.user {
            Some(user) => user,
            None => {
                self.inner
                    .backend
                    .profile(&response.tokens.access_token)
                    .await?
            }
        };

        if user.role != self.inner.config.admin_role {
            warn!(user_id = %user.id, role = %user.role, "refusing non-admin login");
            if let Some(refresh_token) = &response.tokens.refresh_token {
                if let Err(e) = self.inner.backend.logout(refresh_token).await {
                    debug!(error = %e, "could not revoke tokens of refused login");
                }
            }
            return Err(AuthError::InsufficientRole { role: user.role });
        }

        self.set_session(response.tokens, user.clone());
        self.sync_store().await;

        info!(user_id = %user.id, "admin session established");
        Ok(user)
    }

    /// End the session locally, then revoke it on the backend.
    ///
    /// Backend failures are logged only; the local session is gone either way.
    pub async fn logout(&self) {
        let refresh_token = self.clear_with(AuthStatus::SignedOut {
            reason: SignOutReason::UserLogout,
        });
        self.sync_store().await;

        if let Some(refresh_token) = refresh_token {
            if let Err(e) = self.inner.backend.logout(&refresh_token).await {
                warn!(error = %e, "backend logout failed, local session already cleared");
            }
        }
        info!("admin session ended");
    }

    /// Re-establish a session from a persisted refresh token with a silent
    /// refresh. Returns `Ok(None)` when nothing was persisted.
    pub async fn restore(&self) -> Result<Option<User>> {
        if self.is_authenticated() {
            return Ok(self.current_user());
        }

        let Some(refresh_token) = self.inner.store.load().await? else {
            debug!("no persisted refresh token, starting signed out");
            return Ok(None);
        };

        {
            let _slot = self.inner.lock_refresh();
            let current = self.inner.session.load_full();
            if current.refresh_token.is_none() {
                self.inner.session.store(Arc::new(Session {
                    refresh_token: Some(refresh_token),
                    ..Session::clone(&current)
                }));
            }
        }

        let access_token = self.ensure_fresh_token().await?;
        if let Some(user) = self.current_user() {
            return Ok(Some(user));
        }

        let user = self.inner.backend.profile(&access_token).await?;
        if user.role != self.inner.config.admin_role {
            warn!(user_id = %user.id, role = %user.role, "restored session is not an admin session");
            self.clear_with(AuthStatus::SignedOut {
                reason: SignOutReason::InsufficientRole,
            });
            self.sync_store().await;
            return Err(AuthError::InsufficientRole { role: user.role });
        }

        self.install_user(&access_token, user.clone());
        info!(user_id = %user.id, "admin session restored");
        Ok(Some(user))
    }

    /// Attach a profile to the session if it still holds `access_token`.
    fn install_user(&self, access_token: &AccessToken, user: User) {
        let _slot = self.inner.lock_refresh();
        let current = self.inner.session.load_full();
        if current.access_token.as_ref() == Some(access_token) {
            self.inner.session.store(Arc::new(Session {
                user: Some(user.clone()),
                ..Session::clone(&current)
            }));
            self.inner.publish(AuthStatus::Authenticated { user });
        }
    }

    /// Bring the store in line with the refresh token the session holds now.
    ///
    /// Every session change that should reach the store is followed by a
    /// call. Writes are serialized and read the session only once the
    /// previous write finished, so the last write always reflects the latest
    /// session, whatever order concurrent callers arrive in.
    async fn sync_store(&self) {
        let _sync = self.inner.store_sync.lock().await;
        let refresh_token = self.inner.session.load().refresh_token.clone();
        let result = match &refresh_token {
            Some(refresh_token) => self.inner.store.save(refresh_token).await,
            None => self.inner.store.clear().await,
        };
        if let Err(e) = result {
            warn!(error = %e, "refresh token store update failed");
        }
    }
}
