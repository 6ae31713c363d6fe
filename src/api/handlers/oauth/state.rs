//! OAuth2 provider configuration and shared state.

use crate::token::SigningKey;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 730 * 60 * 60;
const DEFAULT_AUTHORIZATION_CODE_TTL_SECONDS: i64 = 10 * 60;

#[derive(Clone, Debug)]
pub struct OAuthConfig {
    issuer: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    authorization_code_ttl_seconds: i64,
    invalidate_refresh_tokens: bool,
}

impl OAuthConfig {
    #[must_use]
    pub fn new(issuer: String) -> Self {
        Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            authorization_code_ttl_seconds: DEFAULT_AUTHORIZATION_CODE_TTL_SECONDS,
            invalidate_refresh_tokens: true,
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_authorization_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.authorization_code_ttl_seconds = seconds;
        self
    }

    /// Refresh-token rotation: when enabled, every refresh bumps the grant
    /// counter so the token just used can never be redeemed again.
    #[must_use]
    pub fn with_invalidate_refresh_tokens(mut self, enabled: bool) -> Self {
        self.invalidate_refresh_tokens = enabled;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub(crate) fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    pub(crate) fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    pub(crate) fn authorization_code_ttl_seconds(&self) -> i64 {
        self.authorization_code_ttl_seconds
    }

    pub(crate) fn invalidate_refresh_tokens(&self) -> bool {
        self.invalidate_refresh_tokens
    }
}

/// Provider state injected into the OAuth handlers.
///
/// The signing key is an explicit dependency here rather than process-wide
/// state; it is constructed once at startup from configuration.
pub struct OAuthState {
    config: OAuthConfig,
    signer: SigningKey,
}

impl OAuthState {
    #[must_use]
    pub fn new(config: OAuthConfig, signer: SigningKey) -> Self {
        Self { config, signer }
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    #[must_use]
    pub fn signer(&self) -> &SigningKey {
        &self.signer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_config_defaults_and_overrides() {
        let config = OAuthConfig::new("https://forge.example.test/".to_string());
        assert_eq!(config.issuer(), "https://forge.example.test");
        assert_eq!(
            config.access_token_ttl_seconds(),
            DEFAULT_ACCESS_TOKEN_TTL_SECONDS
        );
        assert_eq!(
            config.refresh_token_ttl_seconds(),
            DEFAULT_REFRESH_TOKEN_TTL_SECONDS
        );
        assert_eq!(
            config.authorization_code_ttl_seconds(),
            DEFAULT_AUTHORIZATION_CODE_TTL_SECONDS
        );
        assert!(config.invalidate_refresh_tokens());

        let config = config
            .with_access_token_ttl_seconds(60)
            .with_refresh_token_ttl_seconds(120)
            .with_authorization_code_ttl_seconds(30)
            .with_invalidate_refresh_tokens(false);
        assert_eq!(config.access_token_ttl_seconds(), 60);
        assert_eq!(config.refresh_token_ttl_seconds(), 120);
        assert_eq!(config.authorization_code_ttl_seconds(), 30);
        assert!(!config.invalidate_refresh_tokens());
    }

    #[test]
    fn state_exposes_signer() {
        let state = OAuthState::new(
            OAuthConfig::new("https://forge.example.test".to_string()),
            SigningKey::symmetric(b"secret".to_vec()),
        );
        assert!(state.signer().is_symmetric());
        assert_eq!(state.config().issuer(), "https://forge.example.test");
    }
}
