//! Session endpoints, cookie handling, and sign-in finalization.

use anyhow::{Context, Result};
use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::{
    state::AuthState,
    storage::{
        self, SessionData, SessionKind, SessionRow, User, delete_session, insert_session,
        lookup_session,
    },
    types::SessionResponse,
    utils::{generate_csrf_token, hash_session_token, is_external_url},
};

const SESSION_COOKIE_NAME: &str = "forgeid_session";
const CSRF_COOKIE_NAME: &str = "forgeid_csrf";

/// A resolved session plus the token hash needed to mutate or replace it.
pub(crate) struct SessionContext {
    pub(crate) token_hash: Vec<u8>,
    pub(crate) row: SessionRow,
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    // Missing cookies are treated as "no session" to avoid leaking auth state.
    let context = match current_session(&headers, &pool).await {
        Ok(Some(context)) => context,
        Ok(None) => return StatusCode::NO_CONTENT.into_response(),
        Err(status) => return status.into_response(),
    };

    let Some(user_id) = full_session_user(&context) else {
        return StatusCode::NO_CONTENT.into_response();
    };

    match storage::get_user(&pool, user_id).await {
        Ok(Some(user)) => (
            StatusCode::OK,
            Json(SessionResponse {
                user_id: user.id.to_string(),
                username: user.username,
                email: user.email,
                is_admin: user.is_admin,
            }),
        )
            .into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to load session user: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        let token_hash = hash_session_token(&token);
        if let Err(err) = delete_session(&pool, &token_hash).await {
            error!("Failed to delete session: {err}");
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(&auth_state) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

/// Resolve the presented cookie (or bearer token) to a session, if any.
pub(crate) async fn current_session(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<Option<SessionContext>, StatusCode> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    let token_hash = hash_session_token(&token);
    match lookup_session(pool, &token_hash).await {
        Ok(Some(row)) => Ok(Some(SessionContext { token_hash, row })),
        Ok(None) => Ok(None),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn full_session_user(context: &SessionContext) -> Option<Uuid> {
    if context.row.kind == SessionKind::Full {
        context.row.user_id
    } else {
        None
    }
}

/// Require a signed-in session and return it together with its user.
pub(crate) async fn require_full_session(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<(SessionContext, User), StatusCode> {
    let Some(context) = current_session(headers, pool).await? else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Some(user_id) = full_session_user(&context) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    match storage::get_user(pool, user_id).await {
        Ok(Some(user)) => Ok((context, user)),
        Ok(None) => Err(StatusCode::UNAUTHORIZED),
        Err(err) => {
            error!("Failed to load user for session: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Require a pending second-factor session and return it with the parked user id.
pub(crate) async fn require_two_factor_session(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<(SessionContext, Uuid), StatusCode> {
    let Some(context) = current_session(headers, pool).await? else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    if context.row.kind != SessionKind::TwoFactor {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let Some(user_id) = context.row.data.twofa_user_id else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    Ok((context, user_id))
}

/// Result of finalizing a sign-in: cookies to set plus an optional stored
/// redirect target that survived the open-redirect guard.
pub(crate) struct SignInOutcome {
    pub(crate) headers: HeaderMap,
    pub(crate) redirect_to: Option<String>,
}

/// Establish a full session for `user`.
///
/// The old session row (pending 2FA or an earlier sign-in) is deleted and a
/// fresh token issued, so a fixated pre-login session id never becomes an
/// authenticated one. The CSRF cookie is rotated alongside.
pub(crate) async fn finalize_sign_in(
    pool: &PgPool,
    auth_state: &AuthState,
    user: &User,
    remember: bool,
    previous_session_hash: Option<&[u8]>,
    previous_data: &SessionData,
    accept_language: Option<&str>,
) -> Result<SignInOutcome> {
    if let Some(hash) = previous_session_hash {
        delete_session(pool, hash).await?;
    }

    let ttl_seconds = if remember {
        auth_state.config().remember_ttl_seconds()
    } else {
        auth_state.config().session_ttl_seconds()
    };

    let token = insert_session(
        pool,
        SessionKind::Full,
        Some(user.id),
        &SessionData::default(),
        ttl_seconds,
    )
    .await?;

    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        session_cookie_with_ttl(auth_state, &token, ttl_seconds)
            .context("failed to build session cookie")?,
    );
    let csrf = generate_csrf_token()?;
    headers.append(
        SET_COOKIE,
        csrf_cookie(auth_state, &csrf).context("failed to build csrf cookie")?,
    );

    storage::update_last_login(pool, user.id).await?;

    // Persist a locale for users that have none; the client keeps sending
    // Accept-Language either way.
    if user.language.is_empty() {
        if let Some(language) = accept_language.and_then(super::utils::primary_language) {
            storage::update_user_language(pool, user.id, &language).await?;
        }
    }

    let redirect_to = previous_data
        .redirect_to
        .clone()
        .filter(|target| !is_external_url(auth_state.config().base_url(), target));

    Ok(SignInOutcome {
        headers,
        redirect_to,
    })
}

/// Build a secure `HttpOnly` cookie for the session token.
pub(crate) fn session_cookie_with_ttl(
    auth_state: &AuthState,
    token: &str,
    ttl_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    // Only mark cookies secure when the service is served over HTTPS.
    let secure = auth_state.config().session_cookie_secure();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// CSRF cookie is readable by the frontend so it can echo the value back.
fn csrf_cookie(auth_state: &AuthState, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = auth_state.config().session_cookie_secure();
    let mut cookie = format!("{CSRF_COOKIE_NAME}={token}; Path=/; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(auth_state: &AuthState) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = auth_state.config().session_cookie_secure();
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::rate_limit::NoopRateLimiter;
    use crate::api::handlers::auth::state::AuthConfig;

    fn test_state(base_url: &str) -> AuthState {
        AuthState::new(
            AuthConfig::new(base_url.to_string()),
            None,
            Arc::new(NoopRateLimiter),
        )
    }

    #[test]
    fn session_cookie_flags() -> Result<(), InvalidHeaderValue> {
        let state = test_state("https://forge.example.test");
        let cookie = session_cookie_with_ttl(&state, "token", 60)?;
        let cookie = cookie.to_str().expect("ascii cookie");
        assert!(cookie.contains("forgeid_session=token"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=60"));
        assert!(cookie.contains("Secure"));

        let state = test_state("http://localhost:3000");
        let cookie = session_cookie_with_ttl(&state, "token", 60)?;
        assert!(!cookie.to_str().expect("ascii cookie").contains("Secure"));
        Ok(())
    }

    #[test]
    fn csrf_cookie_is_not_http_only() -> Result<(), InvalidHeaderValue> {
        let state = test_state("https://forge.example.test");
        let cookie = csrf_cookie(&state, "token")?;
        assert!(!cookie.to_str().expect("ascii cookie").contains("HttpOnly"));
        Ok(())
    }

    #[test]
    fn extract_session_token_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; forgeid_session=abc123; other=1"),
        );
        assert_eq!(extract_session_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn extract_session_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        headers.insert(
            COOKIE,
            HeaderValue::from_static("forgeid_session=from-cookie"),
        );
        assert_eq!(extract_session_token(&headers), Some("tok".to_string()));
    }

    #[test]
    fn extract_session_token_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_session_token(&headers), None);
    }
}
