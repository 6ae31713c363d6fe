//! Small helpers for credential checks, session tokens, and redirect guards.

use anyhow::{Context, Result};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use url::Url;

/// Normalize a login identifier (username or email) for lookup.
pub(crate) fn normalize_login(login: &str) -> String {
    login.trim().to_lowercase()
}

/// Create a new session token for the auth cookie.
/// The raw value is only returned to set the cookie; the database stores a hash.
pub(crate) fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Fresh CSRF cookie value, rotated whenever a session is finalized.
pub(crate) fn generate_csrf_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate csrf token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session token so raw values never touch the database.
/// The hash is used for lookups when the cookie is presented.
pub(crate) fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Verify a password against its stored argon2 hash.
pub(crate) fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Guard for stored post-login redirect targets.
///
/// Relative paths stay internal; absolute URLs are internal only when their
/// host matches the configured base URL. Anything unparseable is treated as
/// external so the redirect is dropped.
pub(crate) fn is_external_url(base_url: &str, target: &str) -> bool {
    if target.starts_with('/') && !target.starts_with("//") {
        return false;
    }
    match (Url::parse(base_url), Url::parse(target)) {
        (Ok(base), Ok(target)) => target.host_str() != base.host_str(),
        _ => true,
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Extract a client IP for audit logs from common proxy headers.
pub(crate) fn extract_client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Primary language tag from an Accept-Language header value.
pub(crate) fn primary_language(accept_language: &str) -> Option<String> {
    accept_language
        .split(',')
        .next()
        .map(|tag| tag.split(';').next().unwrap_or(tag).trim())
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::{PasswordHasher, password_hash::SaltString};
    use axum::http::{HeaderMap, HeaderValue};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use rand::rngs::OsRng;

    fn hash_password(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .expect("hashing test password")
            .to_string()
    }

    #[test]
    fn normalize_login_trims_and_lowercases() {
        assert_eq!(normalize_login(" Alice "), "alice");
        assert_eq!(normalize_login("Bob@Example.COM"), "bob@example.com");
    }

    #[test]
    fn generate_session_token_is_32_random_bytes() {
        let decoded_len = generate_session_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn hash_session_token_stable() {
        let first = hash_session_token("token");
        let second = hash_session_token("token");
        let different = hash_session_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("hunter2");
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-hash"));
    }

    #[test]
    fn is_external_url_keeps_relative_paths() {
        assert!(!is_external_url("https://forge.example.test", "/user/settings"));
        assert!(!is_external_url("https://forge.example.test", "/"));
    }

    #[test]
    fn is_external_url_rejects_other_hosts() {
        assert!(is_external_url(
            "https://forge.example.test",
            "https://evil.com/phish"
        ));
        assert!(is_external_url("https://forge.example.test", "//evil.com"));
        assert!(is_external_url("https://forge.example.test", "javascript:alert(1)"));
    }

    #[test]
    fn is_external_url_allows_same_host() {
        assert!(!is_external_url(
            "https://forge.example.test",
            "https://forge.example.test/repo"
        ));
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_none_when_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);
    }

    #[test]
    fn primary_language_takes_first_tag() {
        assert_eq!(
            primary_language("de-DE,de;q=0.9,en;q=0.8"),
            Some("de-DE".to_string())
        );
        assert_eq!(primary_language("en"), Some("en".to_string()));
        assert_eq!(primary_language("*"), None);
        assert_eq!(primary_language(""), None);
    }
}
