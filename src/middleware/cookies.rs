use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

pub(crate) const PKCE_COOKIE_NAME: &str = "pkce_state";
pub(crate) const SESSION_COOKIE_NAME: &str = "auth_session";
pub(crate) const ACCESS_TOKEN_COOKIE_NAME: &str = "accessToken";
pub(crate) const REFRESH_TOKEN_COOKIE_NAME: &str = "refreshToken";
/// Script-readable UI hint; carries no credential.
pub(crate) const AUTH_FLAG_COOKIE_NAME: &str = "isAuthenticated";

/// Every cookie this crate may set. Logout clears all of them.
pub(crate) const AUTH_COOKIE_NAMES: [&str; 5] = [
    SESSION_COOKIE_NAME,
    PKCE_COOKIE_NAME,
    ACCESS_TOKEN_COOKIE_NAME,
    REFRESH_TOKEN_COOKIE_NAME,
    AUTH_FLAG_COOKIE_NAME,
];

/// HTTP-only, same-site-lax cookie scoped to the whole app.
pub(super) fn http_only_cookie(
    name: &'static str,
    value: String,
    max_age: Duration,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .build()
}

/// `accessToken` / `refreshToken` cookies for the backend API.
pub(super) fn token_cookies(
    access_token: &str,
    refresh_token: Option<&str>,
    access_max_age: Duration,
    refresh_max_age: Duration,
    secure: bool,
) -> Vec<Cookie<'static>> {
    let mut cookies = vec![http_only_cookie(
        ACCESS_TOKEN_COOKIE_NAME,
        access_token.to_string(),
        access_max_age,
        secure,
    )];
    if let Some(refresh) = refresh_token {
        cookies.push(http_only_cookie(
            REFRESH_TOKEN_COOKIE_NAME,
            refresh.to_string(),
            refresh_max_age,
            secure,
        ));
    }
    cookies
}

/// Client-readable `isAuthenticated=true` flag.
pub(super) fn auth_flag_cookie(max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((AUTH_FLAG_COOKIE_NAME, "true"))
        .http_only(false)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(max_age)
        .build()
}

/// Create removal cookie for `name`.
pub(super) fn removal_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

/// Emits a removal for every auth cookie, whether or not the request carried it.
pub(super) fn clear_auth_cookies(jar: CookieJar) -> CookieJar {
    AUTH_COOKIE_NAMES
        .into_iter()
        .fold(jar, |jar, name| jar.add(removal_cookie(name)))
}
