use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{
    backend::AuthBackend,
    error::AuthError,
    manager::SessionManager,
    session::User,
    storage::RefreshTokenStore,
};

/// The signed-in admin. Rejects with [`AuthError::NotAuthenticated`].
pub struct AdminUser(pub User);

pub struct OptionalAdminUser(pub Option<User>);

impl<B, S> FromRequestParts<SessionManager<B, S>> for AdminUser
where
    B: AuthBackend,
    S: RefreshTokenStore,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        session: &SessionManager<B, S>,
    ) -> std::result::Result<Self, Self::Rejection> {
        // Set by the route guard when it ran for this request
        if let Some(user) = parts.extensions.get::<User>() {
            return Ok(AdminUser(user.clone()));
        }

        if !session.is_authenticated() {
            return Err(AuthError::NotAuthenticated);
        }
        session
            .current_user()
            .map(AdminUser)
            .ok_or(AuthError::NotAuthenticated)
    }
}

impl<B, S> FromRequestParts<SessionManager<B, S>> for OptionalAdminUser
where
    B: AuthBackend,
    S: RefreshTokenStore,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        session: &SessionManager<B, S>,
    ) -> std::result::Result<Self, Self::Rejection> {
        match AdminUser::from_request_parts(parts, session).await {
            Ok(AdminUser(user)) => Ok(OptionalAdminUser(Some(user))),
            Err(_) => Ok(OptionalAdminUser(None)),
        }
    }
}
