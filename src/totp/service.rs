use crate::totp::{crypto, repo::TotpRepo};
use anyhow::{Result, anyhow};
use sqlx::PgPool;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

/// Outcome of a passcode check.
///
/// `Replayed` means the passcode was cryptographically valid but equal to the
/// last accepted one; callers treat it as a rejection and log it as a
/// distinct security signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotpVerification {
    Accepted,
    Rejected,
    Replayed,
}

/// Pure replay check, kept separate so the guard is testable without clocks.
pub(crate) fn is_replayed(last_used_passcode: Option<&str>, presented: &str) -> bool {
    last_used_passcode == Some(presented)
}

#[derive(Clone)]
pub struct TotpService {
    pool: PgPool,
    seed_key: [u8; 32],
    issuer: String,
}

impl TotpService {
    #[must_use]
    pub fn new(pool: PgPool, seed_key: [u8; 32], issuer: String) -> Self {
        Self {
            pool,
            seed_key,
            issuer,
        }
    }

    /// True if the user has a confirmed TOTP credential.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn is_enrolled(&self, user_id: Uuid) -> Result<bool> {
        Ok(TotpRepo::get_active_credential(&self.pool, user_id)
            .await?
            .is_some())
    }

    /// Begins enrollment: generates a secret, encrypts it, stores it, and
    /// returns the plaintext secret plus the otpauth URL for the user.
    ///
    /// Returns: (`secret_base32`, `otpauth_url`, `credential_id`)
    ///
    /// # Errors
    /// Returns an error if secret generation, encryption, or database insertion fails.
    pub async fn enroll_begin(
        &self,
        user_id: Uuid,
        account_name: &str,
        label: Option<String>,
    ) -> Result<(String, String, Uuid)> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| anyhow!("Secret gen error: {e}"))?;

        let credential_id = Uuid::new_v4();
        let ciphertext =
            crypto::encrypt_seed(&self.seed_key, &secret_bytes, user_id, credential_id)?;

        TotpRepo::create_credential(
            &self.pool,
            credential_id,
            user_id,
            &ciphertext,
            label.as_deref(),
        )
        .await?;

        let totp = self.build_totp(secret_bytes, account_name)?;
        let otpauth_url = totp.get_url();
        let secret_str = totp.get_secret_base32();

        Ok((secret_str, otpauth_url, credential_id))
    }

    /// Confirms enrollment by verifying the first code.
    ///
    /// # Errors
    /// Returns an error if the credential is not found, does not belong to the user,
    /// or if decryption/database update fails.
    pub async fn enroll_confirm(
        &self,
        user_id: Uuid,
        credential_id: Uuid,
        code: &str,
        ip: Option<&str>,
    ) -> Result<bool> {
        let cred = TotpRepo::get_credential(&self.pool, credential_id)
            .await?
            .ok_or_else(|| anyhow!("Credential not found"))?;

        if cred.user_id != user_id {
            return Err(anyhow!("Credential does not belong to user"));
        }

        if cred.confirmed_at.is_some() {
            return Ok(true);
        }

        let secret_bytes = crypto::decrypt_seed(
            &self.seed_key,
            &cred.seed_ciphertext,
            user_id,
            credential_id,
        )?;

        let totp = self.build_totp(secret_bytes, "user")?;
        let valid = totp.check_current(code).unwrap_or(false);

        if valid {
            TotpRepo::confirm_credential(&self.pool, user_id, credential_id).await?;
            TotpRepo::log_audit(&self.pool, user_id, Some(credential_id), "confirm", ip).await?;
            Ok(true)
        } else {
            TotpRepo::log_audit(&self.pool, user_id, Some(credential_id), "confirm_fail", ip)
                .await?;
            Ok(false)
        }
    }

    /// Verifies a passcode against the active confirmed credential.
    ///
    /// Applies the exact-replay guard: a passcode equal to the previously
    /// accepted one is refused even if still valid for the current window.
    ///
    /// # Errors
    /// Returns an error if database fetch, decryption, or audit logging fails.
    pub async fn verify(
        &self,
        user_id: Uuid,
        passcode: &str,
        ip: Option<&str>,
    ) -> Result<TotpVerification> {
        let Some(cred) = TotpRepo::get_active_credential(&self.pool, user_id).await? else {
            return Ok(TotpVerification::Rejected);
        };

        let secret_bytes = crypto::decrypt_seed(
            &self.seed_key,
            &cred.seed_ciphertext,
            user_id,
            cred.credential_id,
        )?;

        let totp = self.build_totp(secret_bytes, "user")?;
        let valid = totp.check_current(passcode).unwrap_or(false);

        if !valid {
            TotpRepo::log_audit(
                &self.pool,
                user_id,
                Some(cred.credential_id),
                "verify_failure",
                ip,
            )
            .await?;
            return Ok(TotpVerification::Rejected);
        }

        if is_replayed(cred.last_used_passcode.as_deref(), passcode) {
            TotpRepo::log_audit(
                &self.pool,
                user_id,
                Some(cred.credential_id),
                "verify_replayed",
                ip,
            )
            .await?;
            return Ok(TotpVerification::Replayed);
        }

        TotpRepo::record_used_passcode(&self.pool, cred.credential_id, passcode).await?;
        TotpRepo::log_audit(
            &self.pool,
            user_id,
            Some(cred.credential_id),
            "verify_success",
            ip,
        )
        .await?;
        Ok(TotpVerification::Accepted)
    }

    fn build_totp(&self, secret_bytes: Vec<u8>, account_name: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            account_name.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_guard_rejects_exact_reuse() {
        assert!(is_replayed(Some("123456"), "123456"));
        assert!(!is_replayed(Some("123456"), "654321"));
        assert!(!is_replayed(None, "123456"));
    }

    #[test]
    fn replay_guard_is_exact_not_prefix() {
        assert!(!is_replayed(Some("123456"), "12345"));
        assert!(!is_replayed(Some("12345"), "123456"));
    }
}
