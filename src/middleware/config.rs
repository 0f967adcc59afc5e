use axum_extra::extract::cookie::Key;
use url::Url;

use super::error::AuthError;
use super::store::SessionStore;
use crate::backend::BackendClient;
use crate::crypto;
use crate::oauth::{AuthClient, OAuthConfig};

/// Minimum length of the cookie encryption secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Shared cookie encryption secret.
///
/// Every instance serving the app must be configured with the same value.
/// Each cookie namespace gets its own key derived from it.
#[derive(Clone)]
pub struct SessionSecret(Vec<u8>);

impl SessionSecret {
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the secret is shorter than [`MIN_SECRET_LEN`] bytes.
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, AuthError> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::Config(format!(
                "SESSION_SECRET must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        Ok(Self(secret))
    }

    /// Key for one cookie namespace: `derive(sha256(label || secret))`.
    pub(crate) fn derive_key(&self, label: &str) -> Key {
        let mut material = Vec::with_capacity(label.len() + 1 + self.0.len());
        material.extend_from_slice(label.as_bytes());
        material.push(0);
        material.extend_from_slice(&self.0);
        let digest = crypto::sha256_bytes(&material);
        Key::derive_from(&digest)
    }
}

impl std::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionSecret([REDACTED])")
    }
}

/// Runtime settings shared by the routes and the cookie stores.
#[derive(Debug, Clone)]
pub(crate) struct AuthSettings {
    pub(crate) app_url: Url,
    pub(crate) auth_path: String,
    pub(crate) login_page: String,
    pub(crate) secure_cookies: bool,
    pub(crate) pkce_max_age: time::Duration,
    pub(crate) default_session_ttl: time::Duration,
    pub(crate) refresh_cookie_max_age: time::Duration,
    pub(crate) logout_timeout: std::time::Duration,
    pub(crate) refresh_threshold: f64,
}

impl AuthSettings {
    pub(super) fn defaults(app_url: Url) -> Self {
        Self {
            app_url,
            auth_path: "/api/auth".into(),
            login_page: "/login".into(),
            secure_cookies: true,
            pkce_max_age: time::Duration::minutes(5),
            default_session_ttl: time::Duration::hours(24),
            refresh_cookie_max_age: time::Duration::days(7),
            logout_timeout: std::time::Duration::from_secs(3),
            refresh_threshold: 0.8,
        }
    }
}

/// Storefront authentication configuration.
///
/// Use [`from_env()`](AuthConfig::from_env) for convention-based setup,
/// or [`new()`](AuthConfig::new) with `with_*` methods for full control.
pub struct AuthConfig {
    pub(super) client: AuthClient,
    pub(super) backend: BackendClient,
    pub(super) secret: SessionSecret,
    pub(super) settings: AuthSettings,
}

impl AuthConfig {
    #[must_use]
    pub fn new(client: AuthClient, backend: BackendClient, secret: SessionSecret, app_url: Url) -> Self {
        Self {
            client,
            backend,
            secret,
            settings: AuthSettings::defaults(app_url),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `APP_URL`: public origin of the storefront (e.g. `https://shop.example.com`)
    /// - `OIDC_ISSUER_BASE_URL`: identity provider base URL
    /// - `OIDC_REALM`: identity provider realm
    /// - `OIDC_CLIENT_ID`: OAuth2 client ID
    /// - `SESSION_SECRET`: cookie encryption secret, at least 32 bytes
    /// - `BACKEND_API_URL`: storefront backend base URL
    ///
    /// # Optional env vars
    /// - `OIDC_CLIENT_SECRET`: confidential client secret
    /// - `APP_ENV`: `production` enables `Secure` cookies
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if a required variable is missing, a URL is invalid,
    /// or the secret is too short.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let required = |name: &str| -> Result<String, AuthError> {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AuthError::Config(format!("{name} is required")))
        };
        let parse_url = |name: &str| -> Result<Url, AuthError> {
            required(name)?
                .parse()
                .map_err(|e| AuthError::Config(format!("{name}: {e}")))
        };

        let secret = SessionSecret::new(required("SESSION_SECRET")?)?;
        let app_url = parse_url("APP_URL")?;
        let issuer_base = parse_url("OIDC_ISSUER_BASE_URL")?;
        let realm = required("OIDC_REALM")?;
        let client_id = required("OIDC_CLIENT_ID")?;
        let backend_url = parse_url("BACKEND_API_URL")?;

        let settings = AuthSettings::defaults(app_url.clone());
        let redirect_uri = app_url
            .join(&format!("{}/callback", settings.auth_path))
            .map_err(|e| AuthError::Config(format!("APP_URL: {e}")))?;

        let mut oauth = OAuthConfig::for_realm(&issuer_base, &realm, client_id, redirect_uri)
            .map_err(|e| AuthError::Config(e.to_string()))?;
        if let Some(client_secret) = lookup("OIDC_CLIENT_SECRET").filter(|s| !s.is_empty()) {
            oauth = oauth.with_client_secret(client_secret);
        }

        let production = lookup("APP_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production"));

        Ok(Self::new(
            AuthClient::new(oauth),
            BackendClient::new(backend_url),
            secret,
            app_url,
        )
        .with_secure_cookies(production))
    }

    /// Session store for host routers using [`AuthUser`](super::AuthUser).
    ///
    /// Shares keys and settings with the store behind [`auth_routes`](super::auth_routes).
    #[must_use]
    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(
            &self.secret,
            self.settings.refresh_threshold,
            self.settings.secure_cookies,
        )
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    /// Mount point of the auth routes (default `/api/auth`).
    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.settings.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_login_page(mut self, path: impl Into<String>) -> Self {
        self.settings.login_page = path.into();
        self
    }

    #[must_use]
    pub fn with_pkce_max_age(mut self, max_age: time::Duration) -> Self {
        self.settings.pkce_max_age = max_age;
        self
    }

    /// Lifetime of sessions whose token response carries no `expires_in`.
    #[must_use]
    pub fn with_default_session_ttl(mut self, ttl: time::Duration) -> Self {
        self.settings.default_session_ttl = ttl;
        self
    }

    /// Upper bound on the best-effort backend invalidation during logout.
    #[must_use]
    pub fn with_logout_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.settings.logout_timeout = timeout;
        self
    }

    /// Fraction of the session lifetime after which it is proactively refreshed.
    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: f64) -> Self {
        self.settings.refresh_threshold = threshold.clamp(0.0, 1.0);
        self
    }
}
