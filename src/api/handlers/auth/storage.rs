//! Database helpers for users and server-side sessions.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{generate_session_token, hash_session_token, is_unique_violation};
use crate::api::handlers::oauth::types::PendingAuthorize;

/// Authentication source a user account is bound to.
///
/// Matched, never downcast: handlers branch on the variant to decide whether
/// local second factors apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSource {
    /// Local password accounts; local second factors always apply.
    Local,
    /// An external source, optionally trusted to have done its own MFA.
    External {
        name: String,
        skip_local_two_fa: bool,
    },
}

impl AuthSource {
    pub(crate) fn skip_local_two_fa(&self) -> bool {
        match self {
            Self::Local => false,
            Self::External {
                skip_local_two_fa, ..
            } => *skip_local_two_fa,
        }
    }
}

/// Identity record as read by the auth handlers.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub password_hash: String,
    pub avatar_url: Option<String>,
    pub language: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub prohibit_login: bool,
    pub must_change_password: bool,
    pub source: AuthSource,
}

const USER_COLUMNS: &str = r"
    u.id, u.username, u.full_name, u.email, u.password_hash, u.avatar_url,
    u.language, u.is_active, u.is_admin, u.prohibit_login, u.must_change_password,
    s.name AS source_name, s.skip_local_two_fa AS source_skip_two_fa
";

fn map_user(row: &sqlx::postgres::PgRow) -> Result<User> {
    let source = match row.try_get::<Option<String>, _>("source_name")? {
        Some(name) => AuthSource::External {
            name,
            skip_local_two_fa: row
                .try_get::<Option<bool>, _>("source_skip_two_fa")?
                .unwrap_or(false),
        },
        None => AuthSource::Local,
    };
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        avatar_url: row.try_get("avatar_url")?,
        language: row
            .try_get::<Option<String>, _>("language")?
            .unwrap_or_default(),
        is_active: row.try_get("is_active")?,
        is_admin: row.try_get("is_admin")?,
        prohibit_login: row.try_get("prohibit_login")?,
        must_change_password: row.try_get("must_change_password")?,
        source,
    })
}

/// Look up a user by normalized username or email.
pub(crate) async fn lookup_user_by_login(pool: &PgPool, login: &str) -> Result<Option<User>> {
    let query = format!(
        r"
        SELECT {USER_COLUMNS}
        FROM users u
        LEFT JOIN auth_sources s ON s.id = u.login_source
        WHERE u.username = $1 OR lower(u.email) = $1
        LIMIT 1
        "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(login)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by login")?;

    row.as_ref().map(map_user).transpose()
}

/// Load a user by id.
pub(crate) async fn get_user(pool: &PgPool, user_id: Uuid) -> Result<Option<User>> {
    let query = format!(
        r"
        SELECT {USER_COLUMNS}
        FROM users u
        LEFT JOIN auth_sources s ON s.id = u.login_source
        WHERE u.id = $1
        "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load user")?;

    row.as_ref().map(map_user).transpose()
}

/// Record a successful sign-in.
pub(crate) async fn update_last_login(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "UPDATE users SET last_login_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update last_login_at")?;
    Ok(())
}

/// Persist a locale for users that have none yet.
pub(crate) async fn update_user_language(pool: &PgPool, user_id: Uuid, language: &str) -> Result<()> {
    let query = "UPDATE users SET language = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(language)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update user language")?;
    Ok(())
}

/// Session kinds used to gate the second-factor hop.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Signed-in session with normal access.
    Full,
    /// Password accepted, second factor still outstanding.
    TwoFactor,
}

impl SessionKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::TwoFactor => "two_factor",
        }
    }

    pub(crate) fn from_str(value: &str) -> Option<Self> {
        match value {
            "full" => Some(Self::Full),
            "two_factor" => Some(Self::TwoFactor),
            _ => None,
        }
    }
}

/// Transient cross-request state carried by a session, serialized as one
/// JSONB unit. Field presence is tied to the flow that wrote it; finalizing a
/// sign-in replaces the whole record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twofa_user_id: Option<Uuid>,
    #[serde(default)]
    pub twofa_remember: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webauthn_auth_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_authorize: Option<PendingAuthorize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

/// A session row resolved from a presented cookie token.
pub(crate) struct SessionRow {
    pub(crate) kind: SessionKind,
    pub(crate) user_id: Option<Uuid>,
    pub(crate) data: SessionData,
}

/// Insert a session row and return the raw cookie token.
pub(crate) async fn insert_session(
    pool: &PgPool,
    kind: SessionKind,
    user_id: Option<Uuid>,
    data: &SessionData,
    ttl_seconds: i64,
) -> Result<String> {
    let query = r"
        INSERT INTO auth_sessions (session_hash, kind, user_id, data, expires_at)
        VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let data_json = serde_json::to_value(data).context("failed to serialize session data")?;

    for _ in 0..3 {
        let token = generate_session_token()?;
        let token_hash = hash_session_token(&token);
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(kind.as_str())
            .bind(user_id)
            .bind(&data_json)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Resolve a session token hash to its row, touching `last_seen_at`.
pub(crate) async fn lookup_session(pool: &PgPool, token_hash: &[u8]) -> Result<Option<SessionRow>> {
    let query = r"
        UPDATE auth_sessions
        SET last_seen_at = NOW()
        WHERE session_hash = $1
          AND expires_at > NOW()
        RETURNING kind, user_id, data
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let kind: String = row.try_get("kind")?;
    let kind = SessionKind::from_str(&kind)
        .ok_or_else(|| anyhow!("invalid auth_sessions.kind value: {kind}"))?;
    let data: serde_json::Value = row.try_get("data")?;
    let data = serde_json::from_value(data).context("failed to decode session data")?;

    Ok(Some(SessionRow {
        kind,
        user_id: row.try_get("user_id")?,
        data,
    }))
}

/// Replace a session's transient state.
pub(crate) async fn update_session_data(
    pool: &PgPool,
    token_hash: &[u8],
    data: &SessionData,
) -> Result<()> {
    let query = "UPDATE auth_sessions SET data = $2 WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let data_json = serde_json::to_value(data).context("failed to serialize session data")?;
    sqlx::query(query)
        .bind(token_hash)
        .bind(data_json)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update session data")?;
    Ok(())
}

/// Delete a session row; idempotent.
pub(crate) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = "DELETE FROM auth_sessions WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_kind_round_trips() {
        assert_eq!(
            SessionKind::from_str(SessionKind::Full.as_str()),
            Some(SessionKind::Full)
        );
        assert_eq!(
            SessionKind::from_str(SessionKind::TwoFactor.as_str()),
            Some(SessionKind::TwoFactor)
        );
        assert_eq!(SessionKind::from_str("bogus"), None);
    }

    #[test]
    fn session_data_defaults_to_empty_object() -> Result<()> {
        let data = SessionData::default();
        let value = serde_json::to_value(&data)?;
        assert_eq!(value, serde_json::json!({ "twofa_remember": false }));

        let decoded: SessionData = serde_json::from_value(serde_json::json!({}))?;
        assert_eq!(decoded, data);
        Ok(())
    }

    #[test]
    fn session_data_round_trips_pending_fields() -> Result<()> {
        let data = SessionData {
            twofa_user_id: Some(Uuid::nil()),
            twofa_remember: true,
            webauthn_auth_id: None,
            pending_authorize: None,
            redirect_to: Some("/user/settings".to_string()),
        };
        let decoded: SessionData = serde_json::from_value(serde_json::to_value(&data)?)?;
        assert_eq!(decoded, data);
        Ok(())
    }

    #[test]
    fn auth_source_skip_flag() {
        assert!(!AuthSource::Local.skip_local_two_fa());
        assert!(
            AuthSource::External {
                name: "corp-sso".to_string(),
                skip_local_two_fa: true,
            }
            .skip_local_two_fa()
        );
        assert!(
            !AuthSource::External {
                name: "corp-ldap".to_string(),
                skip_local_two_fa: false,
            }
            .skip_local_two_fa()
        );
    }
}
