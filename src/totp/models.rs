use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row, postgres::PgRow};
use uuid::Uuid;

/// An enrolled (or pending) TOTP credential.
///
/// `last_used_passcode` is the anti-replay anchor: a passcode equal to the
/// last accepted one is rejected even while still inside its time window.
/// `scratch_hash` holds the argon2 hash of the single-use backup code.
#[derive(Debug, Clone)]
pub struct TotpCredential {
    pub credential_id: Uuid,
    pub user_id: Uuid,
    pub label: Option<String>,
    pub seed_ciphertext: Vec<u8>,
    pub last_used_passcode: Option<String>,
    pub scratch_hash: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for TotpCredential {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            credential_id: row.try_get("credential_id")?,
            user_id: row.try_get("user_id")?,
            label: row.try_get("label")?,
            seed_ciphertext: row.try_get("seed_ciphertext")?,
            last_used_passcode: row.try_get("last_used_passcode")?,
            scratch_hash: row.try_get("scratch_hash")?,
            confirmed_at: row.try_get("confirmed_at")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}
