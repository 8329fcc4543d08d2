use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;

use crate::{backend::AuthBackend, manager::SessionManager, storage::RefreshTokenStore};

/// Route guard for dashboard pages.
///
/// Requests without an authenticated admin session are redirected to the
/// configured login path. Otherwise the current [`User`](crate::User) is
/// inserted into the request extensions for extractors to use.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/orders", get(list_orders))
///     .route_layer(axum::middleware::from_fn_with_state(
///         manager.clone(),
///         require_admin::<ApiBackend, MemoryOnly>,
///     ))
///     .with_state(manager);
/// ```
pub async fn require_admin<B, S>(
    State(session): State<SessionManager<B, S>>,
    mut request: Request,
    next: Next,
) -> Response
where
    B: AuthBackend + 'static,
    S: RefreshTokenStore + 'static,
{
    let user = session
        .current_user()
        .filter(|_| session.is_authenticated());

    match user {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => {
            debug!(path = %request.uri().path(), "no admin session, redirecting to login");
            Redirect::to(&session.config().login_path).into_response()
        }
    }
}
