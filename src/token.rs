use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::crypto;
use crate::error::Error;

// Accepted locations for each semantic field, highest priority first.
const ACCESS_TOKEN_PATHS: &[&[&str]] = &[
    &["access_token"],
    &["accessToken"],
    &["token"],
    &["data", "access_token"],
    &["data", "accessToken"],
    &["data", "token"],
    &["data", "tokens", "accessToken"],
    &["data", "tokens", "access_token"],
];
const REFRESH_TOKEN_PATHS: &[&[&str]] = &[
    &["refresh_token"],
    &["refreshToken"],
    &["data", "refresh_token"],
    &["data", "refreshToken"],
    &["data", "tokens", "refreshToken"],
    &["data", "tokens", "refresh_token"],
];
const ID_TOKEN_PATHS: &[&[&str]] = &[
    &["id_token"],
    &["idToken"],
    &["data", "id_token"],
    &["data", "idToken"],
];
const EXPIRES_IN_PATHS: &[&[&str]] = &[
    &["expires_in"],
    &["expiresIn"],
    &["data", "expires_in"],
    &["data", "expiresIn"],
    &["data", "tokens", "expiresIn"],
];
const USER_PATHS: &[&[&str]] = &[&["user"], &["data", "user"], &["data"]];
const USER_ID_KEYS: &[&str] = &["id", "userId", "_id", "sub"];
const USER_NAME_KEYS: &[&str] = &["name", "fullName", "username"];

/// Tokens extracted from any of the accepted response shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_in: Option<u64>,
}

/// User fields extracted from a backend auth response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct NormalizedUser {
    pub id: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub roles: BTreeSet<String>,
}

fn lookup<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    path.iter().try_fold(value, |node, key| node.get(key))
}

fn first_string(value: &JsonValue, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .filter_map(|p| lookup(value, p))
        .find_map(|v| v.as_str().filter(|s| !s.is_empty()).map(str::to_owned))
}

fn first_u64(value: &JsonValue, paths: &[&[&str]]) -> Option<u64> {
    paths.iter().filter_map(|p| lookup(value, p)).find_map(|v| {
        v.as_u64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    })
}

/// Parses a token response tolerant of `token`/`accessToken`/`access_token`,
/// optionally nested under `data` or `data.tokens`.
///
/// Returns `None` when no access token is present in any accepted location.
#[must_use]
pub fn normalize_token_response(value: &JsonValue) -> Option<TokenSet> {
    Some(TokenSet {
        access_token: first_string(value, ACCESS_TOKEN_PATHS)?,
        refresh_token: first_string(value, REFRESH_TOKEN_PATHS),
        id_token: first_string(value, ID_TOKEN_PATHS),
        expires_in: first_u64(value, EXPIRES_IN_PATHS),
    })
}

/// Extracts the user object from a backend auth response.
#[must_use]
pub fn normalize_user(value: &JsonValue) -> NormalizedUser {
    let Some(user) = USER_PATHS
        .iter()
        .filter_map(|p| lookup(value, p))
        .find(|v| v.is_object() && USER_ID_KEYS.iter().any(|k| v.get(k).is_some()))
    else {
        return NormalizedUser::default();
    };

    let id = USER_ID_KEYS.iter().find_map(|k| match user.get(k)? {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let name = USER_NAME_KEYS
        .iter()
        .find_map(|k| user.get(k)?.as_str().map(str::to_owned))
        .or_else(|| {
            let first = user.get("firstName")?.as_str()?;
            let last = user.get("lastName").and_then(JsonValue::as_str).unwrap_or("");
            Some(format!("{first} {last}").trim().to_string())
        });

    let mut roles = BTreeSet::new();
    if let Some(list) = user.get("roles").and_then(JsonValue::as_array) {
        roles.extend(list.iter().filter_map(|r| r.as_str().map(str::to_owned)));
    }
    if let Some(role) = user.get("role").and_then(JsonValue::as_str) {
        roles.insert(role.to_owned());
    }

    NormalizedUser {
        id,
        email: user.get("email").and_then(JsonValue::as_str).map(str::to_owned),
        name,
        roles,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::One(aud) => aud == client_id,
            Self::Many(list) => list.iter().any(|a| a == client_id),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

/// Claims read from an OIDC id-token.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    aud: Audience,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    realm_access: RealmAccess,
}

impl IdTokenClaims {
    /// Union of the top-level `roles` claim and `realm_access.roles`.
    #[must_use]
    pub fn roles(&self) -> BTreeSet<String> {
        self.roles
            .iter()
            .chain(&self.realm_access.roles)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        self.name.clone().or_else(|| self.preferred_username.clone())
    }
}

/// Decodes an id-token payload without checking its signature.
///
/// Only for tokens received directly from the token endpoint over TLS.
///
/// # Errors
///
/// Returns [`Error::Token`] if the token is not a three-part JWT with a JSON payload.
pub fn decode_id_token(id_token: &str) -> Result<IdTokenClaims, Error> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::Token("invalid id_token format".into()));
    }
    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| Error::Token("invalid id_token payload".into()))?;
    serde_json::from_slice(&payload).map_err(|e| Error::Token(format!("id_token claims: {e}")))
}

/// Checks `iss`, `aud`, `exp` and `nonce` of a decoded id-token.
///
/// # Errors
///
/// Returns [`Error::Token`] naming the failed claim.
pub fn verify_id_token_claims(
    claims: &IdTokenClaims,
    expected_issuer: &str,
    client_id: &str,
    expected_nonce: &str,
    now_secs: i64,
) -> Result<(), Error> {
    if claims.iss.trim_end_matches('/') != expected_issuer.trim_end_matches('/') {
        return Err(Error::Token(format!(
            "iss: expected '{expected_issuer}', got '{}'",
            claims.iss
        )));
    }
    if !claims.aud.contains(client_id) {
        return Err(Error::Token("aud: client id not in audience".into()));
    }
    if claims.exp.is_some_and(|exp| exp <= now_secs) {
        return Err(Error::Token("exp: id_token expired".into()));
    }
    let nonce = claims
        .nonce
        .as_deref()
        .ok_or_else(|| Error::Token("missing claim: nonce".into()))?;
    if !crypto::timing_safe_eq(nonce, expected_nonce) {
        return Err(Error::Token("nonce mismatch".into()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn fake_id_token(claims: &JsonValue) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}
