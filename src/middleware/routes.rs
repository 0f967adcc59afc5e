use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::{CookieJar, PrivateCookieJar};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::Duration;

use super::config::{AuthConfig, AuthSettings};
use super::cookies::{self, ACCESS_TOKEN_COOKIE_NAME};
use super::csrf;
use super::error::{AuthError, ErrorCode};
use super::state::AuthState;
use crate::crypto::{self, RedactKind, redact};
use crate::error::Error;
use crate::oauth::AuthorizationHints;
use crate::redirect;
use crate::token::{self, TokenSet};
use crate::types::{PkceState, Session, SessionSource, SessionUpdate, SessionUser, now_millis};

/// Message other tabs listen for to drop cached auth state.
pub const LOGOUT_BROADCAST: &str = "auth:logout";

/// Create the storefront authentication router.
///
/// Mounted under the configured auth path (default `/api/auth`):
///
/// | Method | Path | |
/// |---|---|---|
/// | GET | `/login` | start the OIDC authorization-code + PKCE flow |
/// | GET | `/callback` | finish it and create the session |
/// | POST | `/login` | credential login proxied to the backend |
/// | POST | `/register` | registration proxied to the backend |
/// | GET | `/me` | current user, refreshing the session when due |
/// | POST | `/refresh` | explicit token refresh |
/// | POST | `/logout` | clear every auth cookie |
pub fn auth_routes(config: AuthConfig) -> Router {
    let state = AuthState::new(config);
    let auth_path = state.settings.auth_path.clone();

    Router::new()
        .route(
            &format!("{auth_path}/login"),
            get(oidc_login).post(credential_login),
        )
        .route(&format!("{auth_path}/callback"), get(callback))
        .route(&format!("{auth_path}/register"), post(register))
        .route(&format!("{auth_path}/me"), get(me))
        .route(&format!("{auth_path}/refresh"), post(refresh))
        .route(&format!("{auth_path}/logout"), post(logout))
        .with_state(state)
}

// ── OIDC login ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginParams {
    #[serde(rename = "callbackUrl")]
    callback_url: Option<String>,
    login_hint: Option<String>,
    prompt: Option<String>,
    ui_locales: Option<String>,
}

async fn oidc_login(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Query(params): Query<LoginParams>,
) -> Result<(PrivateCookieJar, Redirect), Response> {
    let redirect_to = redirect::validate_callback_url(params.callback_url.as_deref());
    let hints = AuthorizationHints {
        login_hint: params.login_hint,
        prompt: params.prompt,
        ui_locales: params.ui_locales,
        acr_values: None,
    };

    let auth_req = state.client.authorization_url(hints).map_err(|e| {
        tracing::error!(error = %e, "Failed to start authorization");
        login_error(&state.settings.login_page, ErrorCode::Internal.as_str())
    })?;

    let pkce_state = PkceState {
        code_verifier: auth_req.challenge.verifier,
        state: auth_req.challenge.state,
        nonce: auth_req.challenge.nonce,
        redirect_to: Some(redirect_to),
        created_at: now_millis(),
    };

    // Written before the redirect leaves the server.
    let jar = state
        .pkce
        .store(state.pkce.jar(&headers), &pkce_state)
        .map_err(|e| login_error(&state.settings.login_page, e.code().as_str()))?;

    Ok((jar, Redirect::to(auth_req.url.as_str())))
}

// ── Callback ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn callback(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let (pkce_jar, stored) = state.pkce.retrieve(state.pkce.jar(&headers));
    // Single use: cleared on every outcome below.
    let pkce_jar = state.pkce.clear(pkce_jar);

    match complete_oidc_login(&state, &headers, params, stored).await {
        Ok((session_jar, companions, redirect)) => {
            (pkce_jar, session_jar, companions, redirect).into_response()
        }
        Err(response) => (pkce_jar, response).into_response(),
    }
}

async fn complete_oidc_login(
    state: &AuthState,
    headers: &HeaderMap,
    params: CallbackParams,
    stored: Option<PkceState>,
) -> Result<(PrivateCookieJar, CookieJar, Redirect), Response> {
    let login_page = &state.settings.login_page;

    if let Some(error) = &params.error {
        let desc = params.error_description.as_deref().unwrap_or("Unknown error");
        tracing::warn!(error = %error, description = %desc, "OAuth2 error from identity provider");
        return Err(login_error(login_page, error));
    }

    let code = params
        .code
        .ok_or_else(|| login_error(login_page, "missing_code"))?;

    let received_state = params
        .state
        .ok_or_else(|| login_error(login_page, ErrorCode::StateMismatch.as_str()))?;

    let Some(stored) = stored else {
        tracing::info!("Callback without usable PKCE state");
        return Err(login_error(login_page, ErrorCode::StateMismatch.as_str()));
    };

    if !crypto::timing_safe_eq(&received_state, &stored.state) {
        tracing::warn!(
            ip = csrf::client_ip(headers).as_deref().unwrap_or("-"),
            user_agent = csrf::user_agent(headers).as_deref().unwrap_or("-"),
            "OAuth state mismatch"
        );
        return Err(AuthError::Forbidden(ErrorCode::StateMismatch).into_response());
    }

    let tokens = state
        .client
        .exchange_code(&code, &stored.code_verifier)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Token exchange failed");
            let code = if e.is_timeout() {
                ErrorCode::ServiceUnavailable
            } else {
                ErrorCode::TokenExchangeFailed
            };
            login_error(login_page, code.as_str())
        })?;

    let session = session_from_oidc_tokens(state, headers, tokens, &stored.nonce)?;

    let session_jar = state
        .sessions
        .create(state.sessions.jar(headers), &session)
        .map_err(|e| {
            tracing::error!(error = %e, "Session creation failed");
            login_error(login_page, e.code().as_str())
        })?;

    tracing::info!(
        user_id = %session.user_id,
        email = %session.email.as_deref().map_or_else(String::new, |e| redact(e, RedactKind::Email)),
        "OIDC login successful"
    );

    // Re-validated on the way out even though it was checked when stored.
    let target = redirect::validate_callback_url(stored.redirect_to.as_deref());
    Ok((
        session_jar,
        companion_cookies(&state.settings, &session),
        Redirect::to(&target),
    ))
}

fn session_from_oidc_tokens(
    state: &AuthState,
    headers: &HeaderMap,
    tokens: TokenSet,
    expected_nonce: &str,
) -> Result<Session, Response> {
    let login_page = &state.settings.login_page;
    let token_failure = || login_error(login_page, ErrorCode::TokenExchangeFailed.as_str());

    let id_token = tokens.id_token.clone().ok_or_else(|| {
        tracing::error!("Token response carried no id_token");
        token_failure()
    })?;
    let claims = token::decode_id_token(&id_token).map_err(|e| {
        tracing::error!(error = %e, "Unreadable id_token");
        token_failure()
    })?;

    let nonce_matches = claims
        .nonce
        .as_deref()
        .is_some_and(|nonce| crypto::timing_safe_eq(nonce, expected_nonce));
    if !nonce_matches {
        tracing::warn!(
            ip = csrf::client_ip(headers).as_deref().unwrap_or("-"),
            user_agent = csrf::user_agent(headers).as_deref().unwrap_or("-"),
            "OIDC nonce mismatch"
        );
        return Err(AuthError::Forbidden(ErrorCode::NonceMismatch).into_response());
    }

    let config = state.client.config();
    token::verify_id_token_claims(
        &claims,
        config.issuer().as_str(),
        config.client_id(),
        expected_nonce,
        now_millis() / 1000,
    )
    .map_err(|e| {
        tracing::warn!(error = %e, "id_token claims rejected");
        token_failure()
    })?;

    let issued_at = now_millis();
    Ok(Session {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        id_token: Some(id_token),
        issued_at,
        expires_at: session_expiry(&state.settings, issued_at, tokens.expires_in),
        user_id: claims.sub.clone(),
        email: claims.email.clone(),
        name: claims.display_name(),
        roles: claims.roles(),
        source: SessionSource::Oidc,
    })
}

// ── Session check and refresh ──────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionBody {
    success: bool,
    user: SessionUser,
    expires_at: i64,
}

impl SessionBody {
    fn new(session: &Session) -> Json<Self> {
        Json(Self {
            success: true,
            user: session.user(),
            expires_at: session.expires_at,
        })
    }
}

async fn me(State(state): State<AuthState>, headers: HeaderMap) -> Response {
    let (jar, session) = state.sessions.get(state.sessions.jar(&headers));
    let Some(session) = session else {
        return (jar, AuthError::Unauthenticated).into_response();
    };

    if session.refresh_token.is_none() || !state.sessions.should_refresh(&session) {
        return (jar, SessionBody::new(&session)).into_response();
    }

    match refresh_session(&state, jar, &session).await {
        Ok((jar, refreshed)) => (
            jar,
            companion_cookies(&state.settings, &refreshed),
            SessionBody::new(&refreshed),
        )
            .into_response(),
        Err(e) => {
            tracing::info!(error = %e, user_id = %session.user_id, "Proactive refresh failed, ending session");
            end_session(AuthError::SessionExpired)
        }
    }
}

async fn refresh(State(state): State<AuthState>, headers: HeaderMap) -> Response {
    if let Err(e) = csrf::check_origin(&headers, &state.settings.app_url) {
        return e.into_response();
    }

    let (jar, session) = state.sessions.get(state.sessions.jar(&headers));
    let Some(session) = session else {
        return (jar, AuthError::Unauthenticated).into_response();
    };

    match refresh_session(&state, jar, &session).await {
        Ok((jar, refreshed)) => (
            jar,
            companion_cookies(&state.settings, &refreshed),
            SessionBody::new(&refreshed),
        )
            .into_response(),
        // Transient upstream trouble: keep the session, let the client retry.
        Err(e) if is_transient(&e) => {
            tracing::warn!(error = %e, "Session refresh unavailable");
            AuthError::from_upstream(&e).into_response()
        }
        Err(e) => {
            tracing::info!(error = %e, user_id = %session.user_id, "Refresh rejected, ending session");
            end_session(AuthError::SessionExpired)
        }
    }
}

/// Refreshes through the path the session was issued on.
async fn refresh_session(
    state: &AuthState,
    jar: PrivateCookieJar,
    session: &Session,
) -> Result<(PrivateCookieJar, Session), Error> {
    let refresh_token = session
        .refresh_token
        .as_deref()
        .ok_or_else(|| Error::Token("session has no refresh token".into()))?;

    let tokens = match session.source {
        SessionSource::Oidc => state.client.refresh(refresh_token).await?,
        SessionSource::Credentials => {
            let body = state.backend.refresh(refresh_token).await?;
            token::normalize_token_response(&body)
                .ok_or_else(|| Error::Token("backend refresh: no access token in response".into()))?
        }
    };

    let now = now_millis();
    let update = SessionUpdate {
        access_token: Some(tokens.access_token),
        refresh_token: tokens.refresh_token,
        id_token: tokens.id_token,
        issued_at: Some(now),
        expires_at: Some(session_expiry(&state.settings, now, tokens.expires_in)),
    };
    state
        .sessions
        .update(jar, update)
        .map_err(|e| Error::Token(e.to_string()))
}

// ── Credential proxy ───────────────────────────────────────────────

#[derive(Serialize)]
struct CredentialBody {
    success: bool,
    user: SessionUser,
}

async fn credential_login(
    State(state): State<AuthState>,
    headers: HeaderMap,
    payload: Result<Json<JsonValue>, JsonRejection>,
) -> Result<Response, AuthError> {
    csrf::check_origin(&headers, &state.settings.app_url)?;
    let Json(credentials) = payload.map_err(|_| AuthError::Validation(ErrorCode::InvalidRequest))?;

    let body = state.backend.login(&credentials).await.map_err(|e| {
        tracing::warn!(status = ?e.status(), timeout = e.is_timeout(), "Backend login failed");
        AuthError::from_upstream(&e)
    })?;

    let tokens = token::normalize_token_response(&body).ok_or_else(|| {
        AuthError::Internal("backend login response carried no access token".into())
    })?;
    establish_credentials_session(&state, &headers, tokens, &body, StatusCode::OK)
}

async fn register(
    State(state): State<AuthState>,
    headers: HeaderMap,
    payload: Result<Json<JsonValue>, JsonRejection>,
) -> Result<Response, AuthError> {
    csrf::check_origin(&headers, &state.settings.app_url)?;
    let Json(registration) =
        payload.map_err(|_| AuthError::Validation(ErrorCode::InvalidRequest))?;

    let body = state.backend.register(&registration).await.map_err(|e| {
        tracing::warn!(status = ?e.status(), timeout = e.is_timeout(), "Backend registration failed");
        AuthError::from_upstream(&e)
    })?;

    match token::normalize_token_response(&body) {
        Some(tokens) => {
            establish_credentials_session(&state, &headers, tokens, &body, StatusCode::CREATED)
        }
        // Account created but not signed in (e.g. pending verification).
        None => Ok((
            StatusCode::CREATED,
            Json(serde_json::json!({ "success": true, "authenticated": false })),
        )
            .into_response()),
    }
}

fn establish_credentials_session(
    state: &AuthState,
    headers: &HeaderMap,
    tokens: TokenSet,
    body: &JsonValue,
    status: StatusCode,
) -> Result<Response, AuthError> {
    let user = token::normalize_user(body);
    let user_id = user
        .id
        .ok_or_else(|| AuthError::Internal("backend response carried no user id".into()))?;

    let issued_at = now_millis();
    let session = Session {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        id_token: tokens.id_token,
        issued_at,
        expires_at: session_expiry(&state.settings, issued_at, tokens.expires_in),
        user_id,
        email: user.email,
        name: user.name,
        roles: user.roles,
        source: SessionSource::Credentials,
    };

    let jar = state.sessions.create(state.sessions.jar(headers), &session)?;

    tracing::info!(
        user_id = %session.user_id,
        email = %session.email.as_deref().map_or_else(String::new, |e| redact(e, RedactKind::Email)),
        "Credential login successful"
    );

    Ok((
        status,
        jar,
        companion_cookies(&state.settings, &session),
        Json(CredentialBody {
            success: true,
            user: session.user(),
        }),
    )
        .into_response())
}

// ── Logout ─────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoutBody {
    success: bool,
    broadcast: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_url: Option<String>,
}

async fn logout(
    State(state): State<AuthState>,
    headers: HeaderMap,
) -> Result<(CookieJar, Json<LogoutBody>), AuthError> {
    csrf::check_origin_and_marker(&headers, &state.settings.app_url)?;

    let session = state.sessions.session_from_headers(&headers);
    let access_token = session
        .as_ref()
        .map(|s| s.access_token.clone())
        .or_else(|| {
            CookieJar::from_headers(&headers)
                .get(ACCESS_TOKEN_COOKIE_NAME)
                .map(|c| c.value().to_string())
                .filter(|v| !v.is_empty())
        });
    let had_tokens = access_token.is_some();

    if let Some(token) = access_token {
        spawn_backend_logout(Arc::clone(&state.backend), token, state.settings.logout_timeout);
    }

    tracing::info!(
        target: "audit",
        ip = csrf::client_ip(&headers).as_deref().unwrap_or("-"),
        user_agent = csrf::user_agent(&headers).as_deref().unwrap_or("-"),
        had_tokens,
        "User logout"
    );

    let redirect_url = session
        .filter(|s| s.source == SessionSource::Oidc)
        .map(|_| state.client.end_session_url(&state.settings.app_url).to_string());

    Ok((
        cookies::clear_auth_cookies(CookieJar::new()),
        Json(LogoutBody {
            success: true,
            broadcast: LOGOUT_BROADCAST,
            redirect_url,
        }),
    ))
}

/// Best-effort backend invalidation. Never joined; only its outcome is logged.
fn spawn_backend_logout(
    backend: Arc<crate::backend::BackendClient>,
    access_token: String,
    timeout: std::time::Duration,
) {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, backend.logout(&access_token)).await {
            Ok(Ok(())) => tracing::debug!("Backend session invalidated"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Backend logout failed"),
            Err(_) => tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Backend logout timed out"
            ),
        }
    });
}

// ── Helpers ────────────────────────────────────────────────────────

fn login_error(login_page: &str, code: &str) -> Response {
    let encoded = urlencoding::encode(code);
    Redirect::to(&format!("{login_page}?error={encoded}")).into_response()
}

/// Clears every auth cookie, the session included, and answers with `error`.
fn end_session(error: AuthError) -> Response {
    (cookies::clear_auth_cookies(CookieJar::new()), error).into_response()
}

/// Upstream could not answer, as opposed to refusing the refresh token.
fn is_transient(e: &Error) -> bool {
    if e.is_timeout() {
        return true;
    }
    match e {
        Error::Http(_) => e.status().is_none_or(|s| s >= 500),
        Error::OAuth { status, .. } => status.is_some_and(|s| s >= 500),
        _ => false,
    }
}

/// Upper bound on any session lifetime, whatever `expires_in` upstream reports.
const MAX_SESSION_LIFETIME_MS: i64 = 30 * 24 * 60 * 60 * 1000;

fn lifetime_ms(settings: &AuthSettings, expires_in: Option<u64>) -> i64 {
    let lifetime = match expires_in.filter(|secs| *secs > 0) {
        Some(secs) => i64::try_from(secs).map_or(i64::MAX, |secs| secs.saturating_mul(1000)),
        None => i64::try_from(settings.default_session_ttl.whole_milliseconds()).unwrap_or(i64::MAX),
    };
    lifetime.min(MAX_SESSION_LIFETIME_MS)
}

fn session_expiry(settings: &AuthSettings, issued_at: i64, expires_in: Option<u64>) -> i64 {
    issued_at.saturating_add(lifetime_ms(settings, expires_in))
}

/// `isAuthenticated` flag, plus the backend token cookies for credential sessions.
fn companion_cookies(settings: &AuthSettings, session: &Session) -> CookieJar {
    let remaining_ms = (session.expires_at - now_millis()).max(0);
    let max_age = Duration::seconds((remaining_ms + 999) / 1000);
    let secure = settings.secure_cookies;

    let jar = CookieJar::new().add(cookies::auth_flag_cookie(max_age, secure));
    if session.source != SessionSource::Credentials {
        return jar;
    }
    cookies::token_cookies(
        &session.access_token,
        session.refresh_token.as_deref(),
        max_age,
        settings.refresh_cookie_max_age,
        secure,
    )
    .into_iter()
    .fold(jar, |jar, cookie| jar.add(cookie))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AuthSettings {
        AuthSettings::defaults("https://shop.example.com".parse().unwrap())
    }

    #[test]
    fn lifetime_follows_expires_in() {
        assert_eq!(lifetime_ms(&settings(), Some(300)), 300_000);
        assert_eq!(lifetime_ms(&settings(), None), 24 * 60 * 60 * 1000);
        assert_eq!(lifetime_ms(&settings(), Some(0)), 24 * 60 * 60 * 1000);
    }

    #[test]
    fn huge_expires_in_is_capped() {
        let now = now_millis();
        assert_eq!(lifetime_ms(&settings(), Some(u64::MAX)), MAX_SESSION_LIFETIME_MS);
        assert_eq!(
            session_expiry(&settings(), now, Some(u64::MAX)),
            now + MAX_SESSION_LIFETIME_MS
        );
        assert_eq!(session_expiry(&settings(), i64::MAX - 1, Some(60)), i64::MAX);
    }
}
