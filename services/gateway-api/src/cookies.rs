//! Cookie header helpers

use axum::http::{header, HeaderMap};

use portcullis_auth_core::SessionConfig;

/// `Set-Cookie` value for a new session
pub fn session_cookie(config: &SessionConfig, value: &str) -> String {
    set_cookie(
        config,
        &config.cookie_name,
        value,
        config.session_duration.as_secs(),
    )
}

/// `Set-Cookie` value for a pending login
pub fn login_cookie(config: &SessionConfig, value: &str) -> String {
    set_cookie(
        config,
        &config.login_cookie_name,
        value,
        config.login_state_ttl.as_secs(),
    )
}

/// `Set-Cookie` value that deletes the named cookie
pub fn clear_cookie(config: &SessionConfig, name: &str) -> String {
    set_cookie(config, name, "", 0)
}

// SameSite=Lax: the provider callback arrives as a cross-site top-level GET.
fn set_cookie(config: &SessionConfig, name: &str, value: &str, max_age: u64) -> String {
    let secure = if config.cookie_secure { "; Secure" } else { "" };
    format!("{name}={value}; HttpOnly{secure}; SameSite=Lax; Path=/; Max-Age={max_age}")
}

/// Value of the named cookie from any `Cookie` header
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::time::Duration;

    fn config() -> SessionConfig {
        SessionConfig::new("k".repeat(32)).with_session_duration(Duration::from_secs(3600))
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie(&config(), "abc");
        assert_eq!(
            cookie,
            "portcullis_session=abc; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=3600"
        );

        let insecure = config().with_cookie_secure(false);
        assert!(!session_cookie(&insecure, "abc").contains("Secure"));
    }

    #[test]
    fn test_login_and_clear_cookie() {
        let config = config();
        assert!(login_cookie(&config, "x").starts_with("portcullis_login=x;"));
        assert!(login_cookie(&config, "x").ends_with("Max-Age=300"));
        assert_eq!(
            clear_cookie(&config, "portcullis_login"),
            "portcullis_login=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0"
        );
    }

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark; portcullis_login=l1"));
        headers.append(header::COOKIE, HeaderValue::from_static("portcullis_session=s1"));

        assert_eq!(cookie_value(&headers, "portcullis_session"), Some("s1"));
        assert_eq!(cookie_value(&headers, "portcullis_login"), Some("l1"));
        assert_eq!(cookie_value(&headers, "portcullis"), None);

        let mut empty = HeaderMap::new();
        empty.insert(header::COOKIE, HeaderValue::from_static("portcullis_session="));
        assert_eq!(cookie_value(&empty, "portcullis_session"), None);
    }
}
