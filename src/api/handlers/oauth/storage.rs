//! Database helpers for OAuth2 applications, grants, and authorization codes.

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use sqlx::{FromRow, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::models::{Application, AuthorizationCode, Grant, generate_authorization_code};

/// Look up an application by its public client id.
pub(crate) async fn get_application_by_client_id(
    pool: &PgPool,
    client_id: &str,
) -> Result<Option<Application>> {
    let query = "SELECT * FROM oauth_applications WHERE client_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(client_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup application by client_id")?;

    row.as_ref().map(Application::from_row).transpose().map_err(Into::into)
}

/// Look up an application by primary key.
pub(crate) async fn get_application_by_id(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<Application>> {
    let query = "SELECT * FROM oauth_applications WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup application by id")?;

    row.as_ref().map(Application::from_row).transpose().map_err(Into::into)
}

/// Scope strings are space-separated tokens of URL-safe characters.
pub(crate) fn valid_scope(scope: &str) -> bool {
    if scope.trim().is_empty() {
        return false;
    }
    Regex::new(r"^[0-9a-zA-Z_.:-]+$").is_ok_and(|token_re| {
        scope
            .split(' ')
            .all(|token| !token.is_empty() && token_re.is_match(token))
    })
}

/// The grant for a (application, user) pair, if consent was ever given.
pub(crate) async fn get_grant(
    pool: &PgPool,
    application_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Grant>> {
    let query = "SELECT * FROM oauth_grants WHERE application_id = $1 AND user_id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(application_id)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup grant")?;

    row.as_ref().map(Grant::from_row).transpose().map_err(Into::into)
}

/// Load a grant by primary key.
pub(crate) async fn get_grant_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Grant>> {
    let query = "SELECT * FROM oauth_grants WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load grant")?;

    row.as_ref().map(Grant::from_row).transpose().map_err(Into::into)
}

/// Record a consent decision. The scope is frozen here for the grant's lifetime.
pub(crate) async fn create_grant(
    pool: &PgPool,
    application_id: Uuid,
    user_id: Uuid,
    scope: &str,
) -> Result<Grant> {
    if !valid_scope(scope) {
        return Err(anyhow!("invalid scope: {scope:?}"));
    }
    let query = r"
        INSERT INTO oauth_grants (id, application_id, user_id, scope, nonce)
        VALUES ($1, $2, $3, $4, '')
        RETURNING *
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(Uuid::new_v4())
        .bind(application_id)
        .bind(user_id)
        .bind(scope)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to create grant")?;

    Grant::from_row(&row).map_err(Into::into)
}

/// Atomically advance the rotation counter and return the new value.
///
/// Concurrent refreshes race here on purpose: the loser keeps a token whose
/// embedded counter no longer matches and is rejected on redemption.
pub(crate) async fn increase_grant_counter(pool: &PgPool, grant_id: Uuid) -> Result<i64> {
    let query = r"
        UPDATE oauth_grants
        SET counter = counter + 1, updated_at = NOW()
        WHERE id = $1
        RETURNING counter
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(grant_id)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to increase grant counter")?;

    row.try_get("counter").map_err(Into::into)
}

/// Update the OIDC nonce for the next ID token minted from this grant.
pub(crate) async fn set_grant_nonce(pool: &PgPool, grant_id: Uuid, nonce: &str) -> Result<()> {
    let query = "UPDATE oauth_grants SET nonce = $2, updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(grant_id)
        .bind(nonce)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to set grant nonce")?;
    Ok(())
}

/// Mint an authorization code bound to a grant, redirect URI, and PKCE challenge.
pub(crate) async fn create_authorization_code(
    pool: &PgPool,
    grant_id: Uuid,
    redirect_uri: &str,
    code_challenge: &str,
    code_challenge_method: &str,
    ttl_seconds: i64,
) -> Result<AuthorizationCode> {
    let code = generate_authorization_code()?;
    let query = r"
        INSERT INTO oauth_authorization_codes
            (code, grant_id, redirect_uri, code_challenge, code_challenge_method, expires_at)
        VALUES ($1, $2, $3, $4, $5, NOW() + ($6 * INTERVAL '1 second'))
        RETURNING *
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&code)
        .bind(grant_id)
        .bind(redirect_uri)
        .bind(code_challenge)
        .bind(code_challenge_method)
        .bind(ttl_seconds)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to create authorization code")?;

    AuthorizationCode::from_row(&row).map_err(Into::into)
}

/// Redeem an authorization code: check-and-delete in one statement.
///
/// Two concurrent redemptions can never both see the row; the loser gets
/// `None`. The code is gone even if later validation fails, which only
/// forces a fresh authorization.
pub(crate) async fn consume_authorization_code(
    pool: &PgPool,
    code: &str,
) -> Result<Option<(AuthorizationCode, Grant)>> {
    let query = r"
        DELETE FROM oauth_authorization_codes
        WHERE code = $1
          AND expires_at > NOW()
        RETURNING *
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(code)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume authorization code")?;

    let Some(row) = row else {
        return Ok(None);
    };
    let authorization_code = AuthorizationCode::from_row(&row)?;

    let Some(grant) = get_grant_by_id(pool, authorization_code.grant_id).await? else {
        return Ok(None);
    };

    Ok(Some((authorization_code, grant)))
}

/// Organization and `org:team` membership strings for the `groups` claim.
pub(crate) async fn user_group_names(pool: &PgPool, user_id: Uuid) -> Result<Vec<String>> {
    let query = r"
        SELECT o.slug AS org_slug, NULL::text AS team_slug
        FROM organizations o
        JOIN organization_members m ON m.organization_id = o.id
        WHERE m.user_id = $1
        UNION ALL
        SELECT o.slug, t.slug
        FROM teams t
        JOIN organizations o ON o.id = t.organization_id
        JOIN team_members tm ON tm.team_id = t.id
        WHERE tm.user_id = $1
        ORDER BY 1, 2 NULLS FIRST
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to load group memberships")?;

    let mut groups = Vec::with_capacity(rows.len());
    for row in rows {
        let org: String = row.try_get("org_slug")?;
        let team: Option<String> = row.try_get("team_slug")?;
        groups.push(match team {
            Some(team) => format!("{org}:{team}"),
            None => org,
        });
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::valid_scope;

    #[test]
    fn valid_scope_accepts_token_lists() {
        assert!(valid_scope("openid"));
        assert!(valid_scope("openid profile email"));
        assert!(valid_scope("read:repo write:issue"));
    }

    #[test]
    fn valid_scope_rejects_empty_and_malformed() {
        assert!(!valid_scope(""));
        assert!(!valid_scope("   "));
        assert!(!valid_scope("openid  profile")); // double space yields an empty token
        assert!(!valid_scope("open id/repo"));
        assert!(!valid_scope("scope\nnewline"));
    }
}
