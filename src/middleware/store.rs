//! Encrypted cookie stores for PKCE state and sessions.
//!
//! Both stores are stateless: the cookie is the only copy. Each payload is
//! sealed with AES-GCM under a namespace-specific key and wrapped in an
//! envelope carrying its own expiry, so a replayed or tampered cookie fails
//! closed even if the browser kept it past `Max-Age`.
//!
//! Read paths never error. Anything that fails to decrypt, parse, validate or
//! is too old is removed from the jar and reported as absent. A request that
//! carries no cookie leaves the jar untouched, so no `Set-Cookie` is sent.

use axum::http::HeaderMap;
use axum_extra::extract::{CookieJar, PrivateCookieJar};
use axum_extra::extract::cookie::{Cookie, Key};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::Duration;

use super::config::SessionSecret;
use super::cookies::{self, PKCE_COOKIE_NAME, SESSION_COOKIE_NAME};
use super::error::{AuthError, ErrorCode};
use crate::types::{PkceState, Session, SessionUpdate, now_millis};

const PKCE_KEY_LABEL: &str = "storefront-auth/pkce";
const SESSION_KEY_LABEL: &str = "storefront-auth/session";

/// Tolerated forward skew between instances when checking `createdAt`.
const CLOCK_SKEW_MS: i64 = 30_000;

#[derive(Serialize)]
struct SealRef<'a, T> {
    exp: i64,
    data: &'a T,
}

#[derive(Deserialize)]
struct Sealed<T> {
    exp: i64,
    data: T,
}

#[derive(Clone)]
struct EncryptedCookie {
    name: &'static str,
    key: Key,
    secure: bool,
}

impl EncryptedCookie {
    fn jar(&self, headers: &HeaderMap) -> PrivateCookieJar {
        let jar = PrivateCookieJar::from_headers(headers, self.key.clone());
        // Undecryptable cookies never reach the private jar, so `remove` cannot see them.
        let stale = jar.get(self.name).is_none()
            && CookieJar::from_headers(headers).get(self.name).is_some();
        if stale {
            tracing::debug!(cookie = self.name, "Expiring undecryptable cookie");
            return jar.add(self.expiry());
        }
        jar
    }

    /// Empty-valued cookie with `Max-Age=0`. Reads treat it as absent.
    fn expiry(&self) -> Cookie<'static> {
        cookies::http_only_cookie(self.name, String::new(), Duration::ZERO, self.secure)
    }

    fn seal<T: Serialize>(
        &self,
        jar: PrivateCookieJar,
        data: &T,
        max_age: Duration,
        now_ms: i64,
    ) -> Result<PrivateCookieJar, AuthError> {
        let exp = now_ms + max_age.whole_milliseconds() as i64;
        let payload = serde_json::to_string(&SealRef { exp, data })
            .map_err(|e| AuthError::Internal(format!("sealing {}: {e}", self.name)))?;
        Ok(jar.add(cookies::http_only_cookie(
            self.name,
            payload,
            max_age,
            self.secure,
        )))
    }

    fn open<T: DeserializeOwned>(
        &self,
        jar: &PrivateCookieJar,
        now_ms: i64,
    ) -> Result<Option<T>, &'static str> {
        let Some(cookie) = jar.get(self.name).filter(|c| !c.value().is_empty()) else {
            return Ok(None);
        };
        let sealed: Sealed<T> =
            serde_json::from_str(cookie.value()).map_err(|_| "malformed payload")?;
        if sealed.exp <= now_ms {
            return Err("container expired");
        }
        Ok(Some(sealed.data))
    }

    fn remove(&self, jar: PrivateCookieJar) -> PrivateCookieJar {
        // A pending expiry already deletes the browser's copy.
        if jar.get(self.name).is_some_and(|c| c.value().is_empty()) {
            return jar;
        }
        jar.remove(Cookie::build(self.name).path("/"))
    }
}

/// Short-lived, single-use PKCE state (`pkce_state` cookie).
#[derive(Clone)]
pub struct PkceStateStore {
    cookie: EncryptedCookie,
    max_age: Duration,
}

impl PkceStateStore {
    #[must_use]
    pub fn new(secret: &SessionSecret, max_age: Duration, secure: bool) -> Self {
        Self {
            cookie: EncryptedCookie {
                name: PKCE_COOKIE_NAME,
                key: secret.derive_key(PKCE_KEY_LABEL),
                secure,
            },
            max_age,
        }
    }

    /// Jar for this namespace, decrypting with the PKCE key.
    #[must_use]
    pub fn jar(&self, headers: &HeaderMap) -> PrivateCookieJar {
        self.cookie.jar(headers)
    }

    /// Validates and seals `state`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Validation`] if any field is malformed.
    pub fn store(
        &self,
        jar: PrivateCookieJar,
        state: &PkceState,
    ) -> Result<PrivateCookieJar, AuthError> {
        state.validate().map_err(|e| {
            tracing::warn!(error = %e, "Refusing to store invalid PKCE state");
            AuthError::Validation(ErrorCode::InvalidRequest)
        })?;
        self.cookie.seal(jar, state, self.max_age, now_millis())
    }

    /// Reads the PKCE state. Invalid or stale state is cleared and reported as `None`.
    #[must_use]
    pub fn retrieve(&self, jar: PrivateCookieJar) -> (PrivateCookieJar, Option<PkceState>) {
        self.retrieve_at(jar, now_millis())
    }

    pub(crate) fn retrieve_at(
        &self,
        jar: PrivateCookieJar,
        now_ms: i64,
    ) -> (PrivateCookieJar, Option<PkceState>) {
        let result = self
            .cookie
            .open::<PkceState>(&jar, now_ms)
            .and_then(|state| match state {
                None => Ok(None),
                Some(state) => {
                    state.validate().map_err(|_| "schema validation failed")?;
                    let age = now_ms - state.created_at;
                    if age > self.max_age.whole_milliseconds() as i64 {
                        return Err("older than max age");
                    }
                    if age < -CLOCK_SKEW_MS {
                        return Err("created in the future");
                    }
                    Ok(Some(state))
                }
            });

        match result {
            Ok(Some(state)) => (jar, Some(state)),
            Ok(None) => (jar, None),
            Err(reason) => {
                tracing::warn!(reason, "Discarding PKCE state");
                (self.cookie.remove(jar), None)
            }
        }
    }

    /// Idempotent.
    #[must_use]
    pub fn clear(&self, jar: PrivateCookieJar) -> PrivateCookieJar {
        self.cookie.remove(jar)
    }

    #[cfg(test)]
    pub(crate) fn seal_raw(&self, jar: PrivateCookieJar, state: &PkceState) -> PrivateCookieJar {
        self.cookie
            .seal(jar, state, self.max_age, now_millis())
            .expect("serializable")
    }
}

/// Long-lived encrypted session (`auth_session` cookie).
#[derive(Clone)]
pub struct SessionStore {
    cookie: EncryptedCookie,
    refresh_threshold: f64,
}

impl SessionStore {
    #[must_use]
    pub fn new(secret: &SessionSecret, refresh_threshold: f64, secure: bool) -> Self {
        Self {
            cookie: EncryptedCookie {
                name: SESSION_COOKIE_NAME,
                key: secret.derive_key(SESSION_KEY_LABEL),
                secure,
            },
            refresh_threshold,
        }
    }

    /// Jar for this namespace, decrypting with the session key.
    #[must_use]
    pub fn jar(&self, headers: &HeaderMap) -> PrivateCookieJar {
        self.cookie.jar(headers)
    }

    /// Seals `session` with `Max-Age` equal to its remaining lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Validation`] if the session is malformed, or
    /// [`AuthError::SessionExpired`] if it is already past `expires_at`.
    pub fn create(
        &self,
        jar: PrivateCookieJar,
        session: &Session,
    ) -> Result<PrivateCookieJar, AuthError> {
        session.validate().map_err(|e| {
            tracing::warn!(error = %e, "Refusing to create invalid session");
            AuthError::Validation(ErrorCode::InvalidRequest)
        })?;
        let now = now_millis();
        let remaining_ms = session.expires_at - now;
        if remaining_ms <= 0 {
            return Err(AuthError::SessionExpired);
        }
        let max_age = Duration::seconds((remaining_ms + 999) / 1000);
        self.cookie.seal(jar, session, max_age, now)
    }

    /// Reads the session. Invalid or expired sessions are destroyed and reported as `None`.
    #[must_use]
    pub fn get(&self, jar: PrivateCookieJar) -> (PrivateCookieJar, Option<Session>) {
        self.get_at(jar, now_millis())
    }

    pub(crate) fn get_at(
        &self,
        jar: PrivateCookieJar,
        now_ms: i64,
    ) -> (PrivateCookieJar, Option<Session>) {
        let result = self
            .cookie
            .open::<Session>(&jar, now_ms)
            .and_then(|session| match session {
                None => Ok(None),
                Some(session) => {
                    session.validate().map_err(|_| "schema validation failed")?;
                    if session.is_expired_at(now_ms) {
                        return Err("session expired");
                    }
                    Ok(Some(session))
                }
            });

        match result {
            Ok(Some(session)) => (jar, Some(session)),
            Ok(None) => (jar, None),
            Err(reason) => {
                tracing::debug!(reason, "Destroying session cookie");
                (self.cookie.remove(jar), None)
            }
        }
    }

    /// Read-merge-rewrite of the current session's tokens.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] if there is no valid session,
    /// or any error from [`create`](Self::create).
    pub fn update(
        &self,
        jar: PrivateCookieJar,
        update: SessionUpdate,
    ) -> Result<(PrivateCookieJar, Session), AuthError> {
        let (jar, current) = self.get(jar);
        let current = current.ok_or(AuthError::Unauthenticated)?;
        let merged = update.apply(current);
        let jar = self.create(jar, &merged)?;
        Ok((jar, merged))
    }

    #[must_use]
    pub fn destroy(&self, jar: PrivateCookieJar) -> PrivateCookieJar {
        self.cookie.remove(jar)
    }

    /// Session from request headers without touching the response.
    #[must_use]
    pub fn session_from_headers(&self, headers: &HeaderMap) -> Option<Session> {
        self.get(self.jar(headers)).1
    }

    /// True once more than the configured fraction (default 80%) of the
    /// session's lifetime has elapsed.
    #[must_use]
    pub fn should_refresh(&self, session: &Session) -> bool {
        should_refresh_session(session, self.refresh_threshold, now_millis())
    }
}

/// Lifetime is measured from the stored `issued_at`, not reconstructed from `now`.
#[must_use]
pub fn should_refresh_session(session: &Session, threshold: f64, now_ms: i64) -> bool {
    let lifetime = session.expires_at - session.issued_at;
    if lifetime <= 0 {
        return true;
    }
    let elapsed = now_ms - session.issued_at;
    elapsed as f64 > lifetime as f64 * threshold
}
