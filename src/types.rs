use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::pkce;
use crate::redirect;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Single-use state carried between the login redirect and the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkceState {
    pub code_verifier: String,
    pub state: String,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
}

impl PkceState {
    /// Rejects malformed or tampered values, including non-relative redirect targets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), Error> {
        if !pkce::is_valid_verifier(&self.code_verifier) {
            return Err(Error::Validation("codeVerifier".into()));
        }
        if !pkce::is_valid_state(&self.state) {
            return Err(Error::Validation("state".into()));
        }
        if !pkce::is_valid_nonce(&self.nonce) {
            return Err(Error::Validation("nonce".into()));
        }
        if let Some(target) = &self.redirect_to {
            if !redirect::is_safe_callback_url(target) {
                return Err(Error::Validation("redirectTo".into()));
            }
        }
        if self.created_at <= 0 {
            return Err(Error::Validation("createdAt".into()));
        }
        Ok(())
    }
}

/// Where the session's tokens were obtained; selects the refresh path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    Oidc,
    Credentials,
}

/// Authenticated session sealed into the `auth_session` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Epoch milliseconds.
    pub issued_at: i64,
    /// Epoch milliseconds.
    pub expires_at: i64,
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    pub source: SessionSource,
}

impl Session {
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), Error> {
        if self.access_token.is_empty() {
            return Err(Error::Validation("accessToken".into()));
        }
        if self.user_id.is_empty() {
            return Err(Error::Validation("userId".into()));
        }
        if self.expires_at <= self.issued_at {
            return Err(Error::Validation("expiresAt".into()));
        }
        if self.id_token.as_deref().is_some_and(str::is_empty)
            || self.refresh_token.as_deref().is_some_and(str::is_empty)
        {
            return Err(Error::Validation("token".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }

    /// The script-visible projection of this session.
    #[must_use]
    pub fn user(&self) -> SessionUser {
        SessionUser {
            id: self.user_id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            roles: self.roles.clone(),
        }
    }
}

/// Token fields replaced by a refresh. Identity fields are never touched.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub issued_at: Option<i64>,
    pub expires_at: Option<i64>,
}

impl SessionUpdate {
    #[must_use]
    pub fn apply(self, mut session: Session) -> Session {
        if let Some(v) = self.access_token {
            session.access_token = v;
        }
        if let Some(v) = self.refresh_token {
            session.refresh_token = Some(v);
        }
        if let Some(v) = self.id_token {
            session.id_token = Some(v);
        }
        if let Some(v) = self.issued_at {
            session.issued_at = v;
        }
        if let Some(v) = self.expires_at {
            session.expires_at = v;
        }
        session
    }
}

/// User identity as exposed to the browser (`GET /api/auth/me`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl SessionUser {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    #[must_use]
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|r| self.has_role(r.as_ref()))
    }

    #[must_use]
    pub fn has_all_roles<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().all(|r| self.has_role(r.as_ref()))
    }

    /// `None` or an empty list means any authenticated user.
    #[must_use]
    pub fn can_access<S: AsRef<str>>(&self, required: Option<&[S]>) -> bool {
        match required {
            None => true,
            Some(roles) if roles.is_empty() => true,
            Some(roles) => self.has_any_role(roles),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seller() -> SessionUser {
        SessionUser {
            id: "u-1".into(),
            email: None,
            name: None,
            roles: ["SELLER", "CUSTOMER"].into_iter().map(String::from).collect(),
        }
    }

    fn session(expires_in_ms: i64) -> Session {
        let now = now_millis();
        Session {
            access_token: "access-token-value".into(),
            refresh_token: Some("refresh-token-value".into()),
            id_token: None,
            issued_at: now - 1_000,
            expires_at: now + expires_in_ms,
            user_id: "u-1".into(),
            email: Some("jane@shop.example".into()),
            name: Some("Jane".into()),
            roles: ["CUSTOMER".to_string()].into(),
            source: SessionSource::Credentials,
        }
    }

    #[test]
    fn role_predicates() {
        let user = seller();
        assert!(!user.has_role("ADMIN"));
        assert!(user.has_any_role(&["ADMIN", "SELLER"]));
        assert!(user.has_all_roles(&["SELLER", "CUSTOMER"]));
        assert!(!user.has_all_roles(&["SELLER", "ADMIN"]));
    }

    #[test]
    fn can_access_without_requirement() {
        let user = seller();
        assert!(user.can_access::<&str>(None));
        assert!(user.can_access::<&str>(Some(&[][..])));
        assert!(user.can_access(Some(&["SELLER"][..])));
        assert!(!user.can_access(Some(&["ADMIN", "DELIVERY_AGENT"][..])));
    }

    #[test]
    fn pkce_state_rejects_absolute_redirect() {
        let mut state = PkceState {
            code_verifier: "a".repeat(43),
            state: "s".repeat(22),
            nonce: "n".repeat(22),
            redirect_to: Some("/orders".into()),
            created_at: now_millis(),
        };
        assert!(state.validate().is_ok());
        state.redirect_to = Some("https://evil.example/".into());
        assert!(state.validate().is_err());
    }

    #[test]
    fn pkce_state_serializes_camel_case() {
        let state = PkceState {
            code_verifier: "a".repeat(43),
            state: "s".repeat(22),
            nonce: "n".repeat(22),
            redirect_to: None,
            created_at: 1,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("codeVerifier").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("redirectTo").is_none());
    }

    #[test]
    fn session_validation() {
        assert!(session(60_000).validate().is_ok());
        let mut s = session(60_000);
        s.user_id.clear();
        assert!(s.validate().is_err());
        let mut s = session(60_000);
        s.expires_at = s.issued_at;
        assert!(s.validate().is_err());
    }

    #[test]
    fn update_preserves_identity() {
        let original = session(60_000);
        let updated = SessionUpdate {
            access_token: Some("new-access".into()),
            expires_at: Some(original.expires_at + 1),
            ..SessionUpdate::default()
        }
        .apply(original.clone());
        assert_eq!(updated.access_token, "new-access");
        assert_eq!(updated.refresh_token, original.refresh_token);
        assert_eq!(updated.user_id, original.user_id);
        assert_eq!(updated.roles, original.roles);
    }
}
