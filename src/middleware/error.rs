use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Stable, enumerable error codes returned to the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthenticated,
    SessionExpired,
    AccessDenied,
    InvalidOrigin,
    MissingCsrfHeader,
    StateMismatch,
    NonceMismatch,
    InvalidRequest,
    ValidationFailed,
    InvalidCredentials,
    UserExists,
    RateLimited,
    TokenExchangeFailed,
    ServiceUnavailable,
    Timeout,
    #[serde(rename = "internal_error")]
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::SessionExpired => "session_expired",
            Self::AccessDenied => "access_denied",
            Self::InvalidOrigin => "invalid_origin",
            Self::MissingCsrfHeader => "missing_csrf_header",
            Self::StateMismatch => "state_mismatch",
            Self::NonceMismatch => "nonce_mismatch",
            Self::InvalidRequest => "invalid_request",
            Self::ValidationFailed => "validation_failed",
            Self::InvalidCredentials => "invalid_credentials",
            Self::UserExists => "user_exists",
            Self::RateLimited => "rate_limited",
            Self::TokenExchangeFailed => "token_exchange_failed",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Timeout => "timeout",
            Self::Internal => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication errors for the middleware layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No valid session found.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Session existed but expired or could not be refreshed.
    #[error("Session expired")]
    SessionExpired,

    /// Authenticated, but lacking a required role.
    #[error("Access denied")]
    AccessDenied,

    /// CSRF or replay suspicion.
    #[error("Forbidden: {0}")]
    Forbidden(ErrorCode),

    /// Malformed input rejected at the boundary.
    #[error("Invalid request: {0}")]
    Validation(ErrorCode),

    /// Upstream refused the request with a user-actionable reason.
    #[error("Rejected upstream: {0}")]
    Rejected(ErrorCode),

    /// Upstream unreachable or timed out; the client may retry.
    #[error("Service unavailable: {code}")]
    Unavailable { code: ErrorCode, retry_after_secs: u64 },

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else. Details stay in the server log.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::SessionExpired => ErrorCode::SessionExpired,
            Self::AccessDenied => ErrorCode::AccessDenied,
            Self::Forbidden(code) | Self::Validation(code) | Self::Rejected(code) => *code,
            Self::Unavailable { code, .. } => *code,
            Self::Config(_) | Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Maps an upstream failure to a sanitized error, keeping only the status class.
    pub(crate) fn from_upstream(e: &crate::error::Error) -> Self {
        if e.is_timeout() {
            return Self::Unavailable {
                code: ErrorCode::Timeout,
                retry_after_secs: 5,
            };
        }
        match e.status() {
            Some(400 | 422) => Self::Rejected(ErrorCode::ValidationFailed),
            Some(401 | 403) => Self::Rejected(ErrorCode::InvalidCredentials),
            Some(409) => Self::Rejected(ErrorCode::UserExists),
            Some(429) => Self::Unavailable {
                code: ErrorCode::RateLimited,
                retry_after_secs: 30,
            },
            Some(_) | None => Self::Unavailable {
                code: ErrorCode::ServiceUnavailable,
                retry_after_secs: 10,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    error: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthenticated | Self::SessionExpired => StatusCode::UNAUTHORIZED,
            Self::AccessDenied | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Rejected(code) => match code {
                ErrorCode::InvalidCredentials => StatusCode::UNAUTHORIZED,
                ErrorCode::UserExists => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            },
            Self::Unavailable { code, .. } => match code {
                ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::Config(_) | Self::Internal(_) => {
                tracing::error!(error = %self, "Auth internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let retry_after = match &self {
            Self::Unavailable {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        };

        let body = ErrorBody {
            success: false,
            error: self.code(),
            retry_after,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<crate::error::Error> for AuthError {
    fn from(e: crate::error::Error) -> Self {
        match e {
            crate::error::Error::Config(msg) => Self::Config(msg),
            crate::error::Error::Validation(_) => Self::Validation(ErrorCode::InvalidRequest),
            other => Self::Internal(other.to_string()),
        }
    }
}
