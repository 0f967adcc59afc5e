use std::time::Duration;

use url::Url;

use crate::crypto::{RedactKind, redact};
use crate::error::Error;
use crate::pkce::{self, PkceChallenge};
use crate::token::{self, TokenSet};

const DEFAULT_SCOPES: [&str; 3] = ["openid", "profile", "email"];
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// OIDC identity provider configuration.
///
/// Endpoints follow the `{issuer}/protocol/openid-connect/*` layout and can be
/// overridden individually.
///
/// ```rust,ignore
/// use storefront_auth::OAuthConfig;
///
/// let config = OAuthConfig::for_realm(
///     &"https://id.example.com".parse()?,
///     "shop",
///     "storefront",
///     "https://app.example.com/api/auth/callback".parse()?,
/// )?;
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OAuthConfig {
    pub(crate) client_id: String,
    pub(crate) client_secret: Option<String>,
    pub(crate) issuer: Url,
    pub(crate) auth_url: Url,
    pub(crate) token_url: Url,
    pub(crate) end_session_url: Url,
    pub(crate) redirect_uri: Url,
    pub(crate) scopes: Vec<String>,
    pub(crate) timeout: Duration,
}

impl OAuthConfig {
    /// Configuration for a realm hosted at `base_url` (`{base}/realms/{realm}`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the realm produces an invalid URL.
    pub fn for_realm(
        base_url: &Url,
        realm: &str,
        client_id: impl Into<String>,
        redirect_uri: Url,
    ) -> Result<Self, Error> {
        let base = base_url.as_str().trim_end_matches('/');
        let issuer: Url = format!("{base}/realms/{realm}")
            .parse()
            .map_err(|e| Error::Config(format!("issuer URL: {e}")))?;
        Self::for_issuer(issuer, client_id, redirect_uri)
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] if an endpoint URL cannot be derived from `issuer`.
    pub fn for_issuer(
        issuer: Url,
        client_id: impl Into<String>,
        redirect_uri: Url,
    ) -> Result<Self, Error> {
        let endpoint = |suffix: &str| -> Result<Url, Error> {
            format!(
                "{}/protocol/openid-connect/{suffix}",
                issuer.as_str().trim_end_matches('/')
            )
            .parse()
            .map_err(|e| Error::Config(format!("{suffix} endpoint: {e}")))
        };
        Ok(Self {
            client_id: client_id.into(),
            client_secret: None,
            auth_url: endpoint("auth")?,
            token_url: endpoint("token")?,
            end_session_url: endpoint("logout")?,
            issuer,
            redirect_uri,
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_auth_url(mut self, url: Url) -> Self {
        self.auth_url = url;
        self
    }

    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    /// Override the scopes (default: `openid profile email`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Bound on token endpoint calls.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn issuer(&self) -> &Url {
        &self.issuer
    }

    #[must_use]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

/// Optional UX hints forwarded to the identity provider.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationHints {
    pub login_hint: Option<String>,
    pub prompt: Option<String>,
    pub ui_locales: Option<String>,
    pub acr_values: Option<String>,
}

/// Inputs to [`build_authorization_url`].
#[derive(Debug, Clone)]
pub struct AuthorizationParams {
    /// Absolute callback URI, or a path resolved against `base_url`.
    pub redirect_uri: String,
    pub base_url: Option<Url>,
    pub scope: String,
    pub code_challenge: String,
    pub state: String,
    pub nonce: String,
    pub hints: AuthorizationHints,
}

/// Resolves a callback URI to an absolute URL.
///
/// # Errors
///
/// Returns [`Error::Validation`] for a relative URI without a base, or a non-HTTP scheme.
pub fn normalize_redirect_uri(redirect_uri: &str, base_url: Option<&Url>) -> Result<Url, Error> {
    let url = match Url::parse(redirect_uri) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base_url
            .ok_or_else(|| Error::Validation("redirect_uri must be absolute".into()))?
            .join(redirect_uri)
            .map_err(|e| Error::Validation(format!("redirect_uri: {e}")))?,
        Err(e) => return Err(Error::Validation(format!("redirect_uri: {e}"))),
    };
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Validation("redirect_uri must use http(s)".into()));
    }
    Ok(url)
}

/// Assembles the authorization redirect. Pure: the same inputs give the same URL.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the redirect URI cannot be made absolute.
pub fn build_authorization_url(
    endpoint: &Url,
    client_id: &str,
    params: &AuthorizationParams,
) -> Result<Url, Error> {
    let redirect_uri = normalize_redirect_uri(&params.redirect_uri, params.base_url.as_ref())?;

    let mut url = endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("response_type", "code")
            .append_pair("scope", &params.scope)
            .append_pair("code_challenge", &params.code_challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", &params.state)
            .append_pair("nonce", &params.nonce);

        let hints = [
            ("login_hint", &params.hints.login_hint),
            ("prompt", &params.hints.prompt),
            ("ui_locales", &params.hints.ui_locales),
            ("acr_values", &params.hints.acr_values),
        ];
        for (key, value) in hints {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                query.append_pair(key, value);
            }
        }
    }
    Ok(url)
}

/// OIDC client for the storefront identity provider.
pub struct AuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
}

/// Authorization URL plus the PKCE material the caller must persist.
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: Url,
    pub challenge: PkceChallenge,
}

impl AuthClient {
    #[must_use]
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Generates fresh PKCE material and the matching authorization URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if no secure randomness is available.
    pub fn authorization_url(
        &self,
        hints: AuthorizationHints,
    ) -> Result<AuthorizationRequest, Error> {
        let challenge = pkce::generate_challenge()?;
        let params = AuthorizationParams {
            redirect_uri: self.config.redirect_uri.to_string(),
            base_url: None,
            scope: self.config.scopes.join(" "),
            code_challenge: challenge.challenge.clone(),
            state: challenge.state.clone(),
            nonce: challenge.nonce.clone(),
            hints,
        };
        let url = build_authorization_url(&self.config.auth_url, &self.config.client_id, &params)?;
        Ok(AuthorizationRequest { url, challenge })
    }

    /// Exchanges an authorization code for tokens using the PKCE verifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when the token endpoint does not answer in time,
    /// [`Error::OAuth`] on a non-success status, or [`Error::Token`] if the body
    /// carries no access token.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenSet, Error> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }
        self.token_request(&params, "token exchange").await
    }

    /// # Errors
    ///
    /// Same as [`exchange_code`](Self::exchange_code).
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, Error> {
        tracing::debug!(
            refresh_token = %redact(refresh_token, RedactKind::Token),
            "Refreshing OIDC session"
        );
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }
        self.token_request(&params, "token refresh").await
    }

    /// Federated logout: `{issuer}/protocol/openid-connect/logout?redirect_uri=...`.
    #[must_use]
    pub fn end_session_url(&self, post_logout_redirect: &Url) -> Url {
        let mut url = self.config.end_session_url.clone();
        url.query_pairs_mut()
            .append_pair("redirect_uri", post_logout_redirect.as_str());
        url
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
        operation: &'static str,
    ) -> Result<TokenSet, Error> {
        let response = self
            .http
            .post(self.config.token_url.clone())
            .form(params)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(operation)
                } else {
                    Error::Http(e)
                }
            })?;

        let response = Self::ensure_success(response, operation).await?;
        let body: serde_json::Value = response.json().await?;
        token::normalize_token_response(&body)
            .ok_or_else(|| Error::Token(format!("{operation}: no access token in response")))
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::OAuth {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}
