use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::RsaPublicKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::token::jwt::SigningKey;

/// JSON Web Key Set served at `/login/oauth/keys`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Build the published key set for the configured signing key.
    ///
    /// Symmetric deployments publish an empty set: the HMAC secret is shared
    /// out of band and must never appear here.
    #[must_use]
    pub fn for_signing_key(key: &SigningKey) -> Self {
        match (key.public_key(), key.kid()) {
            (Some(public_key), Some(kid)) => Self {
                keys: vec![Jwk::from_rsa_public_key(&public_key, kid)],
            },
            _ => Self { keys: Vec::new() },
        }
    }

    /// Find a key by `kid` (Key ID).
    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Jwk {
    pub kty: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kid: String,
    pub n: String,
    pub e: String,
}

impl Jwk {
    /// Build an RSA signature JWK from a public key.
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            alg: "RS256".to_string(),
            key_use: "sig".to_string(),
            kid: kid.into(),
            n: Base64UrlUnpadded::encode_string(&public_key.n().to_bytes_be()),
            e: Base64UrlUnpadded::encode_string(&public_key.e().to_bytes_be()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_key_publishes_empty_set() {
        let key = SigningKey::symmetric(b"secret".to_vec());
        let jwks = Jwks::for_signing_key(&key);
        assert!(jwks.keys.is_empty());
        assert!(jwks.find_by_kid("any").is_none());
    }

    #[test]
    fn jwks_serializes_with_keys_field() -> Result<(), serde_json::Error> {
        let jwks = Jwks { keys: Vec::new() };
        let value = serde_json::to_value(&jwks)?;
        assert_eq!(value, serde_json::json!({ "keys": [] }));
        Ok(())
    }

    #[test]
    fn jwk_use_field_renames_to_use() -> Result<(), serde_json::Error> {
        let jwk = Jwk {
            kty: "RSA".to_string(),
            alg: "RS256".to_string(),
            key_use: "sig".to_string(),
            kid: "k1".to_string(),
            n: "AQAB".to_string(),
            e: "AQAB".to_string(),
        };
        let value = serde_json::to_value(&jwk)?;
        assert_eq!(
            value.get("use").and_then(serde_json::Value::as_str),
            Some("sig")
        );
        assert!(value.get("key_use").is_none());
        Ok(())
    }
}
