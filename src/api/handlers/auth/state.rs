//! Auth configuration and shared state.

use std::sync::Arc;
use url::Url;

use super::rate_limit::RateLimiter;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_REMEMBER_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_TWO_FACTOR_TTL_SECONDS: i64 = 5 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    base_url: String,
    session_ttl_seconds: i64,
    remember_ttl_seconds: i64,
    two_factor_ttl_seconds: i64,
    totp_issuer: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        let totp_issuer = Url::parse(&base_url)
            .ok()
            .and_then(|url| url.host_str().map(ToString::to_string))
            .unwrap_or_else(|| "localhost".to_string());
        let base_url = base_url.trim_end_matches('/').to_string();

        Self {
            base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_ttl_seconds: DEFAULT_REMEMBER_TTL_SECONDS,
            two_factor_ttl_seconds: DEFAULT_TWO_FACTOR_TTL_SECONDS,
            totp_issuer,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_two_factor_ttl_seconds(mut self, seconds: i64) -> Self {
        self.two_factor_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    pub(crate) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    pub(crate) fn remember_ttl_seconds(&self) -> i64 {
        self.remember_ttl_seconds
    }

    pub(crate) fn two_factor_ttl_seconds(&self) -> i64 {
        self.two_factor_ttl_seconds
    }

    pub(crate) fn session_cookie_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    scratch_pepper: Option<Arc<[u8]>>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        scratch_pepper: Option<Arc<[u8]>>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            scratch_pepper,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn scratch_pepper(&self) -> Option<&[u8]> {
        self.scratch_pepper.as_deref()
    }

    pub(crate) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::NoopRateLimiter;
    use super::*;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://forge.example.test/".to_string());

        assert_eq!(config.base_url(), "https://forge.example.test");
        assert_eq!(config.totp_issuer(), "forge.example.test");
        assert_eq!(config.session_ttl_seconds(), DEFAULT_SESSION_TTL_SECONDS);
        assert_eq!(config.remember_ttl_seconds(), DEFAULT_REMEMBER_TTL_SECONDS);
        assert_eq!(
            config.two_factor_ttl_seconds(),
            DEFAULT_TWO_FACTOR_TTL_SECONDS
        );
        assert!(config.session_cookie_secure());

        let config = config
            .with_session_ttl_seconds(60)
            .with_remember_ttl_seconds(120)
            .with_two_factor_ttl_seconds(30);

        assert_eq!(config.session_ttl_seconds(), 60);
        assert_eq!(config.remember_ttl_seconds(), 120);
        assert_eq!(config.two_factor_ttl_seconds(), 30);
    }

    #[test]
    fn http_base_url_is_not_secure() {
        let config = AuthConfig::new("http://localhost:3000".to_string());
        assert!(!config.session_cookie_secure());
        assert_eq!(config.totp_issuer(), "localhost");
    }

    #[test]
    fn auth_state_exposes_pepper() {
        let config = AuthConfig::new("https://forge.example.test".to_string());
        let pepper: Arc<[u8]> = Arc::from(b"pepper".as_slice());
        let state = AuthState::new(config, Some(pepper), Arc::new(NoopRateLimiter));
        assert_eq!(state.scratch_pepper(), Some(b"pepper".as_slice()));
    }
}
