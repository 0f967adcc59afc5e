use url::Url;

/// Substituted for any rejected post-login destination.
pub const DEFAULT_CALLBACK_URL: &str = "/";

/// Returns `url` if it is a same-origin relative path, otherwise [`DEFAULT_CALLBACK_URL`].
#[must_use]
pub fn validate_callback_url(url: Option<&str>) -> String {
    match url {
        Some(candidate) if is_safe_callback_url(candidate) => candidate.to_string(),
        Some(rejected) => {
            tracing::warn!(target_len = rejected.len(), "Rejected unsafe callback URL");
            DEFAULT_CALLBACK_URL.to_string()
        }
        None => DEFAULT_CALLBACK_URL.to_string(),
    }
}

/// A target is safe when it is a plain absolute path that stays on the app's origin.
///
/// Control characters, whitespace and backslashes are rejected raw and percent-encoded:
/// browsers strip tab/CR/LF from URLs and read `\` as `/`, which turns `/\t/host` into `//host`.
#[must_use]
pub fn is_safe_callback_url(url: &str) -> bool {
    if !url.starts_with('/') || url.starts_with("//") {
        return false;
    }
    if url.chars().any(|c| c.is_whitespace() || is_separator_like(c)) {
        return false;
    }
    let Ok(decoded) = urlencoding::decode(url) else {
        return false;
    };
    if decoded.starts_with("//") || decoded.chars().any(is_separator_like) {
        return false;
    }
    let lower = url.to_ascii_lowercase();
    if lower.contains("javascript:") || lower.contains("data:") {
        return false;
    }
    stays_on_origin(url)
}

fn is_separator_like(c: char) -> bool {
    c.is_control() || c == '\\'
}

fn stays_on_origin(path: &str) -> bool {
    let Ok(base) = Url::parse(RESOLUTION_BASE) else {
        return false;
    };
    base.join(path)
        .is_ok_and(|resolved| resolved.origin() == base.origin())
}

const RESOLUTION_BASE: &str = "https://callback.invalid/";

/// CSRF origin check for state-changing requests.
///
/// `Origin` wins over `Referer`. No header at all is allowed (non-browser clients);
/// anything present that does not match `app_origin` is rejected.
#[must_use]
pub fn origin_matches(origin: Option<&str>, referer: Option<&str>, app_origin: &Url) -> bool {
    let expected = app_origin.origin();
    let source = match (origin, referer) {
        (Some(o), _) => o,
        (None, Some(r)) => r,
        (None, None) => return true,
    };
    match Url::parse(source) {
        Ok(parsed) => parsed.origin() == expected,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> Url {
        "https://app.example.com".parse().unwrap()
    }

    #[test]
    fn relative_path_is_kept() {
        assert_eq!(validate_callback_url(Some("/dashboard")), "/dashboard");
        assert_eq!(
            validate_callback_url(Some("/orders?tab=open")),
            "/orders?tab=open"
        );
    }

    #[test]
    fn unsafe_targets_fall_back() {
        assert_eq!(validate_callback_url(Some("//evil.com")), "/");
        assert_eq!(validate_callback_url(Some("javascript:alert(1)")), "/");
        assert_eq!(validate_callback_url(Some("/x?u=JavaScript:alert(1)")), "/");
        assert_eq!(validate_callback_url(Some("/x?d=DATA:text/html,hi")), "/");
        assert_eq!(validate_callback_url(Some("https://evil.com/")), "/");
        assert_eq!(validate_callback_url(Some("/\\evil.com")), "/");
        assert_eq!(validate_callback_url(None), "/");
    }

    #[test]
    fn control_characters_and_whitespace_are_rejected() {
        assert_eq!(validate_callback_url(Some("/\t/evil.example/phish")), "/");
        assert_eq!(validate_callback_url(Some("/\n/evil.example")), "/");
        assert_eq!(validate_callback_url(Some("/orders\r\nX-Injected: 1")), "/");
        assert_eq!(validate_callback_url(Some("/orders list")), "/");
        assert_eq!(validate_callback_url(Some("/orders\u{0}")), "/");
    }

    #[test]
    fn encoded_separators_are_rejected() {
        assert_eq!(validate_callback_url(Some("/%09/evil.example")), "/");
        assert_eq!(validate_callback_url(Some("/%0D%0A/evil.example")), "/");
        assert_eq!(validate_callback_url(Some("/%5cevil.example")), "/");
        assert_eq!(validate_callback_url(Some("/%2F/evil.example")), "/");
        assert_eq!(validate_callback_url(Some("/seller\\orders")), "/");
    }

    #[test]
    fn encoded_query_values_survive() {
        assert_eq!(
            validate_callback_url(Some("/search?q=red%20shoes")),
            "/search?q=red%20shoes"
        );
    }

    #[test]
    fn matching_origin_is_valid() {
        assert!(origin_matches(Some("https://app.example.com"), None, &app()));
    }

    #[test]
    fn foreign_origin_is_invalid() {
        assert!(!origin_matches(Some("https://evil.com"), None, &app()));
        assert!(!origin_matches(Some("null"), None, &app()));
    }

    #[test]
    fn missing_headers_are_allowed() {
        assert!(origin_matches(None, None, &app()));
    }

    #[test]
    fn referer_is_used_without_origin() {
        assert!(origin_matches(None, Some("https://app.example.com/cart"), &app()));
        assert!(!origin_matches(None, Some("https://evil.com/cart"), &app()));
    }

    #[test]
    fn origin_takes_precedence_over_referer() {
        assert!(!origin_matches(
            Some("https://evil.com"),
            Some("https://app.example.com/"),
            &app()
        ));
    }
}
