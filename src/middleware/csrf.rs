use axum::http::HeaderMap;
use axum::http::header::{ORIGIN, REFERER, USER_AGENT};
use url::Url;

use super::error::{AuthError, ErrorCode};
use crate::redirect;

/// Marker header a simple cross-origin form post cannot set.
pub const CSRF_HEADER: &str = "x-requested-with";

/// Compares `Origin` (falling back to `Referer`) with the app origin.
///
/// Requests carrying neither header are allowed through.
#[must_use]
pub fn is_valid_origin(headers: &HeaderMap, app_url: &Url) -> bool {
    redirect::origin_matches(header_str(headers, ORIGIN), header_str(headers, REFERER), app_url)
}

/// Origin check for state-changing endpoints.
pub(super) fn check_origin(headers: &HeaderMap, app_url: &Url) -> Result<(), AuthError> {
    if is_valid_origin(headers, app_url) {
        return Ok(());
    }
    tracing::warn!(
        origin = header_str(headers, ORIGIN).unwrap_or("-"),
        referer = header_str(headers, REFERER).unwrap_or("-"),
        ip = client_ip(headers).as_deref().unwrap_or("-"),
        user_agent = user_agent(headers).as_deref().unwrap_or("-"),
        "Origin mismatch on state-changing request"
    );
    Err(AuthError::Forbidden(ErrorCode::InvalidOrigin))
}

/// Origin check plus the [`CSRF_HEADER`] marker, required whenever an `Origin` is sent.
pub(super) fn check_origin_and_marker(headers: &HeaderMap, app_url: &Url) -> Result<(), AuthError> {
    check_origin(headers, app_url)?;
    if headers.contains_key(ORIGIN) && !headers.contains_key(CSRF_HEADER) {
        tracing::warn!(
            ip = client_ip(headers).as_deref().unwrap_or("-"),
            user_agent = user_agent(headers).as_deref().unwrap_or("-"),
            "Missing CSRF marker header"
        );
        return Err(AuthError::Forbidden(ErrorCode::MissingCsrfHeader));
    }
    Ok(())
}

fn header_str(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub(super) fn user_agent(headers: &HeaderMap) -> Option<String> {
    header_str(headers, USER_AGENT).map(str::to_string)
}

pub(super) fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| header_str(headers, "x-real-ip").map(str::to_string))
}
