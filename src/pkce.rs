use crate::crypto;
use crate::error::Error;

const VERIFIER_BYTES: usize = 32;
const STATE_BYTES: usize = 16;
const NONCE_BYTES: usize = 16;

const VERIFIER_MIN_LEN: usize = 43;
const VERIFIER_MAX_LEN: usize = 128;
const TOKEN_MIN_LEN: usize = 16;

/// Fresh PKCE material for one authorization flow.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
    pub nonce: String,
}

/// Generates a verifier, its S256 challenge, a CSRF state and an OIDC nonce.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the secure random source is unavailable.
pub fn generate_challenge() -> Result<PkceChallenge, Error> {
    let verifier = generate_code_verifier()?;
    let challenge = generate_code_challenge(&verifier);
    Ok(PkceChallenge {
        verifier,
        challenge,
        state: crypto::secure_random(STATE_BYTES)?,
        nonce: crypto::secure_random(NONCE_BYTES)?,
    })
}

/// 43-character URL-safe verifier (32 random bytes).
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the secure random source is unavailable.
pub fn generate_code_verifier() -> Result<String, Error> {
    crypto::secure_random(VERIFIER_BYTES)
}

/// `challenge = BASE64URL(SHA256(verifier))`
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    crypto::base64url(&crypto::sha256(verifier))
}

/// RFC 7636 verifier: 43-128 chars of `[A-Za-z0-9-._~]`.
#[must_use]
pub fn is_valid_verifier(value: &str) -> bool {
    (VERIFIER_MIN_LEN..=VERIFIER_MAX_LEN).contains(&value.len())
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

#[must_use]
pub fn is_valid_state(value: &str) -> bool {
    is_url_safe_token(value)
}

#[must_use]
pub fn is_valid_nonce(value: &str) -> bool {
    is_url_safe_token(value)
}

fn is_url_safe_token(value: &str) -> bool {
    value.len() >= TOKEN_MIN_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_fields_are_unique_per_call() {
        let a = generate_challenge().unwrap();
        let b = generate_challenge().unwrap();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
        assert_ne!(a.state, b.state);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn challenge_fields_pass_their_validators() {
        let c = generate_challenge().unwrap();
        assert!(is_valid_verifier(&c.verifier));
        assert!(is_valid_state(&c.state));
        assert!(is_valid_nonce(&c.nonce));
        assert_eq!(c.state.len(), 22);
    }

    #[test]
    fn challenge_is_s256_of_verifier() {
        let c = generate_challenge().unwrap();
        assert_eq!(c.challenge, generate_code_challenge(&c.verifier));
        assert!(!c.challenge.contains(['+', '/', '=']));
    }

    #[test]
    fn code_challenge_deterministic() {
        let c1 = generate_code_challenge("test_verifier_string");
        let c2 = generate_code_challenge("test_verifier_string");
        assert_eq!(c1, c2);
    }

    #[test]
    fn verifier_length_bounds() {
        assert!(is_valid_verifier(&"a".repeat(43)));
        assert!(is_valid_verifier(&"Z".repeat(128)));
        assert!(!is_valid_verifier(&"a".repeat(42)));
        assert!(!is_valid_verifier(&"a".repeat(129)));
    }

    #[test]
    fn verifier_rejects_reserved_chars() {
        let mut value = "a".repeat(42);
        value.push('+');
        assert!(!is_valid_verifier(&value));
        assert!(is_valid_verifier(&format!("{}-._~", "a".repeat(40))));
    }

    #[test]
    fn state_and_nonce_format() {
        assert!(is_valid_state("abcdefghijklmnop"));
        assert!(!is_valid_state("short"));
        assert!(!is_valid_state("abcdefghijklmno."));
        assert!(!is_valid_nonce("abcdefghijklmnop="));
    }
}
