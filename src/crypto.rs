//! Primitive building blocks shared by the PKCE generator and the cookie stores.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::Error;

/// Fills `length_bytes` bytes from the OS CSPRNG and returns them base64url-encoded
/// (no padding).
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the operating system source cannot be read.
/// There is no fallback generator.
pub fn secure_random(length_bytes: usize) -> Result<String, Error> {
    let mut bytes = vec![0u8; length_bytes];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[must_use]
pub fn sha256(input: &str) -> [u8; 32] {
    sha256_bytes(input.as_bytes())
}

#[must_use]
pub fn sha256_bytes(input: &[u8]) -> [u8; 32] {
    Sha256::digest(input).into()
}

#[must_use]
pub fn base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time string comparison.
///
/// Unequal lengths still run a full-cost comparison before returning `false`.
#[must_use]
pub fn timing_safe_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        let _ = a.ct_eq(a);
        return false;
    }
    a.ct_eq(b).into()
}

/// Kinds of sensitive values handled by [`redact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactKind {
    /// Bearer credentials: keeps an 8-char prefix and the length.
    Token,
    /// Keeps only the domain.
    Email,
    /// Passwords, secrets, keys.
    Secret,
}

/// Produces a placeholder that is safe to write to logs.
#[must_use]
pub fn redact(value: &str, kind: RedactKind) -> String {
    match kind {
        RedactKind::Token => {
            let prefix: String = value.chars().take(8).collect();
            format!("{prefix}...({} chars)", value.len())
        }
        RedactKind::Email => match value.rsplit_once('@') {
            Some((_, domain)) => format!("***@{domain}"),
            None => "***".into(),
        },
        RedactKind::Secret => "[REDACTED]".into(),
    }
}
