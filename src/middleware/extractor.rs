use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;

use super::error::AuthError;
use super::store::SessionStore;
use crate::types::SessionUser;

/// Authenticated user extracted from the encrypted session cookie.
///
/// Use as an Axum extractor in route handlers. Returns `401 Unauthorized`
/// if no valid session exists. The host state must provide a
/// [`SessionStore`] through [`FromRef`]; get one from
/// [`AuthConfig::session_store`](super::AuthConfig::session_store).
///
/// # Example
///
/// ```rust,ignore
/// async fn seller_dashboard(user: AuthUser) -> Result<impl IntoResponse, AuthError> {
///     user.require_any_role(&["SELLER", "ADMIN"])?;
///     Ok(format!("Hello, {}", user.id))
/// }
///
/// // Optional: accessible to both authenticated and anonymous users
/// async fn storefront(user: Option<AuthUser>) -> impl IntoResponse {
///     match user {
///         Some(u) => format!("Hello, {}", u.id),
///         None => "Hello, guest".to_string(),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser(pub SessionUser);

impl AuthUser {
    /// # Errors
    ///
    /// Returns [`AuthError::AccessDenied`] unless the user holds at least one
    /// of `roles`. An empty list admits any authenticated user.
    pub fn require_any_role<S: AsRef<str>>(&self, roles: &[S]) -> Result<(), AuthError> {
        if self.0.can_access(Some(roles)) {
            return Ok(());
        }
        tracing::info!(user_id = %self.0.id, "Access denied: missing required role");
        Err(AuthError::AccessDenied)
    }
}

impl std::ops::Deref for AuthUser {
    type Target = SessionUser;

    fn deref(&self) -> &SessionUser {
        &self.0
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    SessionStore: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let sessions = SessionStore::from_ref(state);
        sessions
            .session_from_headers(&parts.headers)
            .map(|session| Self(session.user()))
            .ok_or(AuthError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;
    use crate::middleware::config::SessionSecret;

    fn user(roles: &[&str]) -> AuthUser {
        AuthUser(SessionUser {
            id: "u-1".into(),
            email: None,
            name: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        })
    }

    #[test]
    fn role_guard() {
        let seller = user(&["SELLER"]);
        assert!(seller.require_any_role(&["SELLER", "ADMIN"]).is_ok());
        assert!(seller.require_any_role::<&str>(&[]).is_ok());
        assert!(matches!(
            seller.require_any_role(&["DELIVERY_AGENT"]),
            Err(AuthError::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn missing_cookie_is_unauthenticated() {
        let store = SessionStore::new(&SessionSecret::new("s".repeat(32)).unwrap(), 0.8, false);
        let (mut parts, ()) = Request::new(()).into_parts();
        let result = AuthUser::from_request_parts(&mut parts, &store).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
    }
}
