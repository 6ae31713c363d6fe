//! OAuth2 application, grant, and authorization-code models.

use anyhow::{Context, Result};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, Row, postgres::PgRow};
use std::net::IpAddr;
use url::Url;
use uuid::Uuid;

/// A registered OAuth2 client (RFC 6749 calls this simply "client").
///
/// `confidential_client` records the RFC 6749 §2.1 client type; public
/// clients cannot keep a secret and therefore must use PKCE.
#[derive(Debug, Clone)]
pub struct Application {
    pub id: Uuid,
    pub name: String,
    pub client_id: String,
    pub client_secret_hash: Option<String>,
    pub confidential_client: bool,
    pub skip_secondary_authorization: bool,
    pub redirect_uris: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Application {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let redirect_uris: serde_json::Value = row.try_get("redirect_uris")?;
        let redirect_uris = serde_json::from_value(redirect_uris).map_err(|err| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid redirect_uris value: {err}"),
            )))
        })?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            client_id: row.try_get("client_id")?,
            client_secret_hash: row.try_get("client_secret_hash")?,
            confidential_client: row.try_get("confidential_client")?,
            skip_secondary_authorization: row.try_get("skip_secondary_authorization")?,
            redirect_uris,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Application {
    /// Check whether `redirect_uri` is registered for this client.
    ///
    /// OAuth2 requires an exact match, no prefix or dynamic parts. The one
    /// exception: public native clients may vary the port of an http loopback
    /// URI (RFC 8252 §7.3), so `http://127.0.0.1:<port>/cb` matches a
    /// registered `http://127.0.0.1/cb`.
    #[must_use]
    pub fn contains_redirect_uri(&self, redirect_uri: &str) -> bool {
        if !self.confidential_client {
            if let Ok(uri) = Url::parse(redirect_uri) {
                if uri.scheme() == "http" && uri.port().is_some() && is_loopback_host(&uri) {
                    let mut stripped = uri.clone();
                    if stripped.set_port(None).is_ok() && self.contains_exact(stripped.as_str()) {
                        return true;
                    }
                }
            }
        }
        self.contains_exact(redirect_uri)
    }

    fn contains_exact(&self, redirect_uri: &str) -> bool {
        let needle = normalize_uri(redirect_uri);
        self.redirect_uris
            .iter()
            .any(|registered| normalize_uri(registered) == needle)
    }

    /// Validate a presented client secret against the stored hash.
    ///
    /// Clients without a stored secret (public clients) never validate.
    #[must_use]
    pub fn validate_client_secret(&self, secret: &str) -> bool {
        let Some(hash) = self.client_secret_hash.as_deref() else {
            return false;
        };
        verify_client_secret(secret, hash)
    }
}

fn normalize_uri(uri: &str) -> String {
    uri.trim_end_matches('/').to_lowercase()
}

fn is_loopback_host(uri: &Url) -> bool {
    uri.host_str()
        .and_then(|host| host.parse::<IpAddr>().ok())
        .is_some_and(|ip| ip.is_loopback())
}

/// A user's consent for an application to act with a fixed scope.
///
/// One grant per (user, application) pair; the scope is frozen at creation
/// and the counter advances on refresh-token rotation.
#[derive(Debug, Clone)]
pub struct Grant {
    pub id: Uuid,
    pub user_id: Uuid,
    pub application_id: Uuid,
    pub scope: String,
    pub nonce: String,
    pub counter: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Grant {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            application_id: row.try_get("application_id")?,
            scope: row.try_get("scope")?,
            nonce: row.try_get("nonce")?,
            counter: row.try_get("counter")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Grant {
    /// True if the grant's space-separated scope list contains `scope`.
    #[must_use]
    pub fn scope_contains(&self, scope: &str) -> bool {
        self.scope.split(' ').any(|granted| granted == scope)
    }
}

/// Single-use artifact exchanged for tokens at the token endpoint.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code: String,
    pub grant_id: Uuid,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub expires_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AuthorizationCode {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            code: row.try_get("code")?,
            grant_id: row.try_get("grant_id")?,
            redirect_uri: row.try_get("redirect_uri")?,
            code_challenge: row.try_get("code_challenge")?,
            code_challenge_method: row.try_get("code_challenge_method")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl AuthorizationCode {
    /// Validate the PKCE verifier against the stored challenge (RFC 7636 §4.6).
    #[must_use]
    pub fn validate_code_challenge(&self, verifier: &str) -> bool {
        match self.code_challenge_method.as_str() {
            "S256" => {
                let hash = Sha256::digest(verifier.as_bytes());
                URL_SAFE_NO_PAD.encode(hash) == self.code_challenge
            }
            "plain" => verifier == self.code_challenge,
            "" => true,
            _ => false,
        }
    }

    /// Build the success redirect carrying `code` and, if non-empty, `state`.
    ///
    /// # Errors
    /// Returns an error if the stored redirect URI does not parse.
    pub fn redirect_uri_with_code(&self, state: &str) -> Result<Url> {
        let mut redirect = Url::parse(&self.redirect_uri).context("invalid redirect URI")?;
        {
            let mut query = redirect.query_pairs_mut();
            if !state.is_empty() {
                query.append_pair("state", state);
            }
            query.append_pair("code", &self.code);
        }
        Ok(redirect)
    }
}

/// Generate an opaque authorization code.
///
/// The prefix makes leaked codes easy for secret scanners to spot.
///
/// # Errors
/// Returns an error if the system RNG fails.
pub(crate) fn generate_authorization_code() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate authorization code")?;
    Ok(format!("fac_{}", URL_SAFE_NO_PAD.encode(bytes)))
}

fn verify_client_secret(secret: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::{PasswordHasher, password_hash::SaltString};
    use rand::rngs::OsRng;

    fn hash_secret(secret: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .expect("hashing test secret")
            .to_string()
    }

    // RFC 7636 appendix B test vector.
    const PKCE_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const PKCE_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn test_app(confidential: bool, redirect_uris: Vec<&str>) -> Application {
        Application {
            id: Uuid::nil(),
            name: "test".to_string(),
            client_id: "client".to_string(),
            client_secret_hash: None,
            confidential_client: confidential,
            skip_secondary_authorization: false,
            redirect_uris: redirect_uris.into_iter().map(str::to_string).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_code(method: &str, challenge: &str) -> AuthorizationCode {
        AuthorizationCode {
            code: "fac_test".to_string(),
            grant_id: Uuid::nil(),
            redirect_uri: "https://good.com/callback".to_string(),
            code_challenge: challenge.to_string(),
            code_challenge_method: method.to_string(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn redirect_uri_requires_exact_match() {
        let app = test_app(true, vec!["https://good.com/callback"]);
        assert!(app.contains_redirect_uri("https://good.com/callback"));
        assert!(!app.contains_redirect_uri("https://evil.com/callback"));
        assert!(!app.contains_redirect_uri("https://good.com/callback/extra"));
        assert!(!app.contains_redirect_uri("https://good.com"));
    }

    #[test]
    fn redirect_uri_match_ignores_case_and_trailing_slash() {
        let app = test_app(true, vec!["https://good.com/callback/"]);
        assert!(app.contains_redirect_uri("https://GOOD.com/callback"));
    }

    #[test]
    fn loopback_port_is_ignored_for_public_clients() {
        let app = test_app(false, vec!["http://127.0.0.1/cb"]);
        assert!(app.contains_redirect_uri("http://127.0.0.1:49152/cb"));
        assert!(app.contains_redirect_uri("http://127.0.0.1/cb"));
        // Not loopback, port must match the registration exactly.
        assert!(!app.contains_redirect_uri("http://192.168.0.1:49152/cb"));
    }

    #[test]
    fn loopback_port_is_not_ignored_for_confidential_clients() {
        let app = test_app(true, vec!["http://127.0.0.1/cb"]);
        assert!(!app.contains_redirect_uri("http://127.0.0.1:49152/cb"));
    }

    #[test]
    fn pkce_s256_matches_rfc_vector() {
        let code = test_code("S256", PKCE_CHALLENGE);
        assert!(code.validate_code_challenge(PKCE_VERIFIER));
        assert!(!code.validate_code_challenge("wrong-verifier"));
    }

    #[test]
    fn pkce_plain_compares_directly() {
        let code = test_code("plain", "plain-value");
        assert!(code.validate_code_challenge("plain-value"));
        assert!(!code.validate_code_challenge("other-value"));
    }

    #[test]
    fn pkce_empty_method_accepts_anything() {
        let code = test_code("", "");
        assert!(code.validate_code_challenge(""));
        assert!(code.validate_code_challenge("whatever"));
    }

    #[test]
    fn pkce_unknown_method_rejects() {
        let code = test_code("S512", PKCE_CHALLENGE);
        assert!(!code.validate_code_challenge(PKCE_VERIFIER));
    }

    #[test]
    fn redirect_with_code_appends_query() -> Result<()> {
        let code = test_code("", "");
        let url = code.redirect_uri_with_code("xyz")?;
        assert_eq!(url.as_str(), "https://good.com/callback?state=xyz&code=fac_test");

        let url = code.redirect_uri_with_code("")?;
        assert_eq!(url.as_str(), "https://good.com/callback?code=fac_test");
        Ok(())
    }

    #[test]
    fn grant_scope_contains_exact_tokens() {
        let grant = Grant {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            application_id: Uuid::nil(),
            scope: "openid profile email".to_string(),
            nonce: String::new(),
            counter: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(grant.scope_contains("openid"));
        assert!(grant.scope_contains("email"));
        assert!(!grant.scope_contains("mail"));
        assert!(!grant.scope_contains("openid profile"));
    }

    #[test]
    fn client_secret_round_trip() {
        let secret = "fcs_test-client-secret";

        let mut app = test_app(true, vec![]);
        app.client_secret_hash = Some(hash_secret(secret));
        assert!(app.validate_client_secret(secret));
        assert!(!app.validate_client_secret("fcs_wrong"));
    }

    #[test]
    fn public_client_never_validates_a_secret() {
        let app = test_app(false, vec![]);
        assert!(!app.validate_client_secret(""));
        assert!(!app.validate_client_secret("anything"));
    }

    #[test]
    fn authorization_codes_are_prefixed_and_unique() -> Result<()> {
        let first = generate_authorization_code()?;
        let second = generate_authorization_code()?;
        assert!(first.starts_with("fac_"));
        assert_ne!(first, second);
        Ok(())
    }
}
