//! Security-key challenge/response verification.
//!
//! The service coordinates the two-step WebAuthn protocol: it issues a
//! challenge for the browser, keeps the ephemeral protocol state in memory,
//! and verifies the returned assertion against the stored credentials. On top
//! of the cryptographic check it compares the authenticator's signature
//! counter with the stored one; a counter that did not strictly increase
//! means a cloned authenticator and the login is refused outright.

use crate::webauthn::repo::SecurityKeyRepo;
use anyhow::{Result, anyhow};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use webauthn_rs::prelude::*;

/// Outcome of an assertion check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityKeyVerification {
    Accepted { user_id: Uuid },
    /// Valid signature but a non-increasing signature counter.
    CounterRegression { user_id: Uuid },
}

/// Signature-counter clone check.
///
/// Authenticators without counter support report zero on both sides; any
/// other combination must strictly increase.
pub(crate) fn counter_regressed(stored: i64, presented: i64) -> bool {
    if stored == 0 && presented == 0 {
        return false;
    }
    presented <= stored
}

pub struct SecurityKeyService {
    webauthn: Arc<Webauthn>,
    pool: PgPool,
    // In-memory store for in-flight authentication states
    auth_states: Mutex<HashMap<Uuid, SecurityKeyAuthentication>>,
}

impl SecurityKeyService {
    /// Create a new security key service.
    ///
    /// # Errors
    /// Returns error if the `WebAuthn` builder fails.
    pub fn new(pool: PgPool, rp_id: &str, rp_origin: &str) -> Result<Self> {
        let rp_origin_url = Url::parse(rp_origin)?;
        let webauthn = WebauthnBuilder::new(rp_id, &rp_origin_url)?
            .rp_name("Forgeid")
            .build()?;

        Ok(Self {
            webauthn: Arc::new(webauthn),
            pool,
            auth_states: Mutex::new(HashMap::new()),
        })
    }

    /// True if the user has at least one registered key.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn has_keys(&self, user_id: Uuid) -> Result<bool> {
        Ok(!SecurityKeyRepo::list_user_keys(&self.pool, user_id)
            .await?
            .is_empty())
    }

    /// Starts the authentication flow.
    ///
    /// # Errors
    /// Returns error if no keys are registered, or the database query fails.
    pub async fn auth_begin(&self, user_id: Uuid) -> Result<(RequestChallengeResponse, Uuid)> {
        let keys = SecurityKeyRepo::list_user_keys(&self.pool, user_id).await?;
        if keys.is_empty() {
            return Err(anyhow!("No security keys registered for this user"));
        }

        let passkeys: Vec<SecurityKey> = keys
            .into_iter()
            .filter_map(|k| serde_json::from_slice(&k.public_key).ok())
            .collect();

        let (challenge, authentication) =
            self.webauthn.start_securitykey_authentication(&passkeys)?;

        let auth_id = Uuid::new_v4();
        let mut states = self.auth_states.lock().await;
        states.insert(auth_id, authentication);

        Ok((challenge, auth_id))
    }

    /// Finishes the authentication flow.
    ///
    /// # Errors
    /// Returns error if the session is not found, the assertion does not
    /// verify, or database access fails.
    pub async fn auth_finish(
        &self,
        auth_id: Uuid,
        auth_response: PublicKeyCredential,
        ip: Option<&str>,
    ) -> Result<SecurityKeyVerification> {
        let authentication = {
            let mut states = self.auth_states.lock().await;
            states
                .remove(&auth_id)
                .ok_or_else(|| anyhow!("Authentication session not found or expired"))?
        };

        let auth_result = self
            .webauthn
            .finish_securitykey_authentication(&auth_response, &authentication)?;

        let key = SecurityKeyRepo::get_key(&self.pool, auth_result.cred_id().as_slice())
            .await?
            .ok_or_else(|| anyhow!("Security key not found in database after authentication"))?;

        let presented = i64::from(auth_result.counter());
        if counter_regressed(key.sign_count, presented) {
            SecurityKeyRepo::log_audit(
                &self.pool,
                key.user_id,
                Some(key.credential_id.as_slice()),
                "clone_detected",
                ip,
            )
            .await?;
            return Ok(SecurityKeyVerification::CounterRegression {
                user_id: key.user_id,
            });
        }

        SecurityKeyRepo::update_key_usage(&self.pool, &key.credential_id, presented).await?;
        SecurityKeyRepo::log_audit(
            &self.pool,
            key.user_id,
            Some(key.credential_id.as_slice()),
            "verify_success",
            ip,
        )
        .await?;

        Ok(SecurityKeyVerification::Accepted {
            user_id: key.user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_must_strictly_increase() {
        assert!(!counter_regressed(3, 4));
        assert!(counter_regressed(3, 3));
        assert!(counter_regressed(3, 2));
    }

    #[test]
    fn zero_counters_mean_no_counter_support() {
        assert!(!counter_regressed(0, 0));
        // A counter appearing after being zero is an increase.
        assert!(!counter_regressed(0, 1));
        // A counter dropping back to zero is a regression.
        assert!(counter_regressed(5, 0));
    }
}
