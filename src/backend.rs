use std::time::Duration;

use serde_json::Value as JsonValue;
use url::Url;

use crate::crypto::{RedactKind, redact};
use crate::error::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the storefront backend's `/api/v1/auth/*` endpoints.
///
/// Responses are returned as raw JSON; callers normalize them with
/// [`token::normalize_token_response`](crate::token::normalize_token_response).
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: Url,
    http: reqwest::Client,
    timeout: Duration,
}

impl BackendClient {
    /// `base_url` is treated as a directory; a missing trailing slash is added.
    #[must_use]
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            http: reqwest::Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `POST /api/v1/auth/login` with the caller's credential payload.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`], [`Error::OAuth`] carrying the upstream status, or [`Error::Http`].
    pub async fn login(&self, credentials: &JsonValue) -> Result<JsonValue, Error> {
        self.post_json("login", credentials, "backend login").await
    }

    /// `POST /api/v1/auth/register`.
    ///
    /// # Errors
    ///
    /// Same as [`login`](Self::login).
    pub async fn register(&self, registration: &JsonValue) -> Result<JsonValue, Error> {
        self.post_json("register", registration, "backend registration")
            .await
    }

    /// `POST /api/v1/auth/refresh`.
    ///
    /// # Errors
    ///
    /// Same as [`login`](Self::login).
    pub async fn refresh(&self, refresh_token: &str) -> Result<JsonValue, Error> {
        tracing::debug!(
            refresh_token = %redact(refresh_token, RedactKind::Token),
            "Refreshing backend session"
        );
        let body = serde_json::json!({ "refreshToken": refresh_token });
        self.post_json("refresh", &body, "backend refresh").await
    }

    /// `POST /api/v1/auth/logout` with the bearer token. Uses the client timeout;
    /// callers wanting a tighter bound wrap it in `tokio::time::timeout`.
    ///
    /// # Errors
    ///
    /// Same as [`login`](Self::login).
    pub async fn logout(&self, access_token: &str) -> Result<(), Error> {
        let response = self
            .http
            .post(self.endpoint("logout")?)
            .bearer_auth(access_token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify(e, "backend logout"))?;
        ensure_success(response, "backend logout").await?;
        Ok(())
    }

    fn endpoint(&self, action: &str) -> Result<Url, Error> {
        self.base_url
            .join(&format!("api/v1/auth/{action}"))
            .map_err(|e| Error::Config(format!("backend URL: {e}")))
    }

    async fn post_json(
        &self,
        action: &str,
        body: &JsonValue,
        operation: &'static str,
    ) -> Result<JsonValue, Error> {
        let response = self
            .http
            .post(self.endpoint(action)?)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify(e, operation))?;
        let response = ensure_success(response, operation).await?;
        response.json().await.map_err(Into::into)
    }
}

fn classify(e: reqwest::Error, operation: &'static str) -> Error {
    if e.is_timeout() {
        Error::Timeout(operation)
    } else {
        Error::Http(e)
    }
}

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

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn client(server: &MockServer) -> BackendClient {
        BackendClient::new(server.uri().parse().unwrap())
    }

    #[tokio::test]
    async fn login_forwards_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .and(body_json(serde_json::json!({ "email": "a@b.c", "password": "pw" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "data": { "token": "at" } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let body = client(&server)
            .await
            .login(&serde_json::json!({ "email": "a@b.c", "password": "pw" }))
            .await
            .unwrap();
        assert_eq!(body["data"]["token"], "at");
    }

    #[tokio::test]
    async fn login_failure_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .login(&serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn logout_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/logout"))
            .and(header("authorization", "Bearer at-123"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).await.logout("at-123").await.unwrap();
    }

    #[test]
    fn base_url_keeps_prefix() {
        let client = BackendClient::new("https://api.example.com/shop".parse().unwrap());
        assert_eq!(
            client.endpoint("login").unwrap().as_str(),
            "https://api.example.com/shop/api/v1/auth/login"
        );
    }

    #[tokio::test]
    async fn timeout_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .with_timeout(Duration::from_millis(100))
            .register(&serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
