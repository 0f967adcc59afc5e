use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::Error;
use crate::types::SessionUser;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUESTED_WITH: &str = "X-Requested-With";

/// Result of asking the server who the current user is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCheck {
    /// 200 with a user payload.
    Authenticated(SessionUser),
    /// 401, or 404 when the endpoint is not deployed.
    Unauthenticated,
    /// Any other status. Callers keep their previous state.
    ServerError(u16),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogoutOutcome {
    /// Federated logout URL to follow instead of the home page.
    pub redirect_url: Option<String>,
}

/// Browser-facing auth endpoints as seen by the coordinator.
///
/// `Err` means no response was received (network failure, timeout).
pub trait SessionApi: Send + Sync + 'static {
    fn fetch_session(&self) -> impl Future<Output = Result<SessionCheck, Error>> + Send;

    fn logout(&self) -> impl Future<Output = Result<LogoutOutcome, Error>> + Send;
}

/// [`SessionApi`] over HTTP, keeping cookies in a reqwest cookie store.
#[derive(Debug, Clone)]
pub struct HttpSessionApi {
    app_url: Url,
    auth_path: String,
    http: reqwest::Client,
    timeout: Duration,
}

#[derive(Deserialize)]
struct MeResponse {
    user: SessionUser,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogoutResponse {
    #[serde(default)]
    redirect_url: Option<String>,
}

impl HttpSessionApi {
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(app_url: Url) -> Result<Self, Error> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            app_url,
            auth_path: "/api/auth".into(),
            http,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn with_auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, action: &str) -> Result<Url, Error> {
        self.app_url
            .join(&format!("{}/{action}", self.auth_path))
            .map_err(|e| Error::Config(format!("auth endpoint: {e}")))
    }
}

fn classify(e: reqwest::Error, operation: &'static str) -> Error {
    if e.is_timeout() {
        Error::Timeout(operation)
    } else {
        Error::Http(e)
    }
}

impl SessionApi for HttpSessionApi {
    async fn fetch_session(&self) -> Result<SessionCheck, Error> {
        let response = self
            .http
            .get(self.endpoint("me")?)
            .header(REQUESTED_WITH, "XMLHttpRequest")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify(e, "session check"))?;

        match response.status().as_u16() {
            200 => match response.json::<MeResponse>().await {
                Ok(body) => Ok(SessionCheck::Authenticated(body.user)),
                Err(e) => {
                    tracing::warn!(error = %e, "Session check returned no user payload");
                    Ok(SessionCheck::Unauthenticated)
                }
            },
            401 | 404 => Ok(SessionCheck::Unauthenticated),
            status => Ok(SessionCheck::ServerError(status)),
        }
    }

    async fn logout(&self) -> Result<LogoutOutcome, Error> {
        let response = self
            .http
            .post(self.endpoint("logout")?)
            .header(REQUESTED_WITH, "XMLHttpRequest")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify(e, "logout"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::OAuth {
                operation: "logout",
                status: Some(status.as_u16()),
                detail: response.text().await.unwrap_or_default(),
            });
        }
        let body: LogoutResponse = response.json().await?;
        Ok(LogoutOutcome {
            redirect_url: body.redirect_url,
        })
    }
}
