use crate::{
    api,
    api::handlers::{auth::AuthConfig, oauth::OAuthConfig},
    token::SigningKey,
};
use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::{fs, sync::Arc};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub base_url: String,
    pub session_ttl_seconds: i64,
    pub remember_ttl_seconds: i64,
    pub two_factor_ttl_seconds: i64,
    pub totp_seed_key: String,
    pub scratch_pepper: Option<String>,
    pub oauth_jwt_secret: Option<String>,
    pub oauth_signing_key_path: Option<String>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub invalidate_refresh_tokens: bool,
}

/// Execute the server action.
/// # Errors
/// Returns an error if key material cannot be loaded or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let signer = build_signer(
        args.oauth_jwt_secret.as_deref(),
        args.oauth_signing_key_path.as_deref(),
    )?;

    let totp_seed_key = decode_seed_key(&args.totp_seed_key)?;
    let scratch_pepper: Option<Arc<[u8]>> = args
        .scratch_pepper
        .as_deref()
        .map(|pepper| Arc::from(pepper.as_bytes()));

    let auth_config = AuthConfig::new(args.base_url.clone())
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_remember_ttl_seconds(args.remember_ttl_seconds)
        .with_two_factor_ttl_seconds(args.two_factor_ttl_seconds);

    let oauth_config = OAuthConfig::new(args.base_url)
        .with_access_token_ttl_seconds(args.access_token_ttl_seconds)
        .with_refresh_token_ttl_seconds(args.refresh_token_ttl_seconds)
        .with_invalidate_refresh_tokens(args.invalidate_refresh_tokens);

    api::new(
        args.port,
        args.dsn,
        auth_config,
        oauth_config,
        signer,
        totp_seed_key,
        scratch_pepper,
    )
    .await
}

fn build_signer(
    jwt_secret: Option<&str>,
    signing_key_path: Option<&str>,
) -> Result<SigningKey> {
    if let Some(path) = signing_key_path {
        let pem = fs::read_to_string(path)
            .with_context(|| format!("Failed to read signing key: {path}"))?;
        return SigningKey::from_rsa_pem(&pem, "default")
            .map_err(|err| anyhow!("Invalid RSA signing key: {err}"));
    }
    let secret = jwt_secret.ok_or_else(|| anyhow!("OAuth signing configuration is required"))?;
    Ok(SigningKey::symmetric(secret.as_bytes().to_vec()))
}

/// Decode the base64 TOTP seed-encryption key; it must be exactly 32 bytes.
fn decode_seed_key(value: &str) -> Result<[u8; 32]> {
    let bytes = STANDARD
        .decode(value.trim())
        .context("Invalid base64 in FORGEID_TOTP_SEED_KEY")?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow!("TOTP seed key must be 32 bytes, got {len}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_seed_key_accepts_32_bytes() -> Result<()> {
        let encoded = STANDARD.encode([7u8; 32]);
        let key = decode_seed_key(&encoded)?;
        assert_eq!(key, [7u8; 32]);
        Ok(())
    }

    #[test]
    fn decode_seed_key_rejects_wrong_length() {
        let encoded = STANDARD.encode([7u8; 16]);
        assert!(decode_seed_key(&encoded).is_err());
        assert!(decode_seed_key("not-base64!!").is_err());
    }

    #[test]
    fn build_signer_prefers_rsa_path_and_requires_one() {
        let err = build_signer(None, None).expect_err("no config must fail");
        assert!(err.to_string().contains("signing configuration"));

        let signer = build_signer(Some("secret"), None).expect("symmetric signer");
        assert!(signer.is_symmetric());
    }
}
