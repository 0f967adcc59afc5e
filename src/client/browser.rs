/// Name of the script-readable flag cookie set alongside a session.
pub const AUTH_FLAG_COOKIE: &str = "isAuthenticated";

/// The page environment the coordinator runs in.
pub trait Browser: Send + Sync + 'static {
    /// Script-visible cookies, formatted like `document.cookie`.
    fn document_cookie(&self) -> String;

    /// Path, query and fragment of the current location.
    fn current_path(&self) -> String;

    fn navigate(&self, url: &str);
}

/// True when `document_cookie` carries `isAuthenticated=true`.
///
/// The session cookie itself is HTTP-only, so this flag is the only hint a
/// script has that a session check is worth making.
#[must_use]
pub fn has_auth_flag(document_cookie: &str) -> bool {
    document_cookie
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .any(|(name, value)| name == AUTH_FLAG_COOKIE && value == "true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_flag() {
        assert!(has_auth_flag("theme=dark; isAuthenticated=true"));
        assert!(has_auth_flag("isAuthenticated=true"));
        assert!(!has_auth_flag("isAuthenticated=false"));
        assert!(!has_auth_flag("xisAuthenticated=true"));
        assert!(!has_auth_flag(""));
    }
}
