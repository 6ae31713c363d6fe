//! Interactive sign-in orchestration.
//!
//! Flow Overview:
//! 1) Verify the primary credential against the identity store.
//! 2) Distinguish failure modes: unknown user and wrong password collapse
//!    into one message, but prohibited and inactive accounts each get their
//!    own response since the user's next step differs.
//! 3) If the account's auth source is trusted to skip local 2FA, or no second
//!    factor is enrolled, finalize immediately.
//! 4) Otherwise park the user in a regenerated pending session and tell the
//!    client which factor to present (security key preferred over TOTP).

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::ACCEPT_LANGUAGE},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};

use super::{
    rate_limit::{RateLimitAction, RateLimitDecision},
    session::{self, current_session, session_cookie_with_ttl},
    state::AuthState,
    storage::{self, SessionData, SessionKind},
    types::{LoginRequest, LoginResponse, TwoFactorMethod},
    utils::{extract_client_ip, normalize_login, verify_password},
};
use crate::totp::TotpService;
use crate::webauthn::SecurityKeyService;

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in, or second factor required", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account prohibited or not activated"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
#[allow(clippy::too_many_lines)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    totp_service: Extension<TotpService>,
    webauthn_service: Extension<Arc<SecurityKeyService>>,
    payload: Option<Json<LoginRequest>>,
) -> axum::response::Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let login = normalize_login(&request.login);
    let client_ip = extract_client_ip(&headers);

    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_login(&login, RateLimitAction::Login)
            == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited").into_response();
    }

    let user = match storage::lookup_user_by_login(&pool, &login).await {
        Ok(user) => user,
        Err(err) => {
            error!("Failed to lookup user: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Unknown account and wrong password produce the same answer so the
    // endpoint cannot be used to probe for usernames.
    let Some(user) = user else {
        info!(login = %login, ip = ?client_ip, "failed sign-in attempt: unknown user");
        return (StatusCode::UNAUTHORIZED, "username or password is incorrect").into_response();
    };
    if !verify_password(&request.password, &user.password_hash) {
        info!(login = %login, ip = ?client_ip, "failed sign-in attempt: wrong password");
        return (StatusCode::UNAUTHORIZED, "username or password is incorrect").into_response();
    }

    if user.prohibit_login {
        info!(user_id = %user.id, ip = ?client_ip, "sign-in refused: login prohibited");
        return (StatusCode::FORBIDDEN, "sign-in is prohibited for this account, contact an administrator")
            .into_response();
    }
    if !user.is_active {
        info!(user_id = %user.id, ip = ?client_ip, "sign-in refused: account not activated");
        return (StatusCode::FORBIDDEN, "account is not activated, check your activation mail")
            .into_response();
    }

    // The presented pre-login session, if any, never survives authentication.
    let previous = match current_session(&headers, &pool).await {
        Ok(previous) => previous,
        Err(status) => return status.into_response(),
    };
    let previous_hash = previous.as_ref().map(|ctx| ctx.token_hash.clone());

    let two_factor_method =
        match pick_two_factor_method(&user, &totp_service, &webauthn_service).await {
            Ok(method) => method,
            Err(err) => {
                error!("Failed to determine second factor enrollment: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

    let Some(method) = two_factor_method else {
        let accept_language = headers
            .get(ACCEPT_LANGUAGE)
            .and_then(|value| value.to_str().ok());
        let pending = SessionData {
            redirect_to: request.redirect_to.clone(),
            ..SessionData::default()
        };
        let outcome = match session::finalize_sign_in(
            &pool,
            &auth_state,
            &user,
            request.remember,
            previous_hash.as_deref(),
            &pending,
            accept_language,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Failed to finalize sign-in: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        info!(user_id = %user.id, "user signed in");
        return (
            StatusCode::OK,
            outcome.headers,
            Json(LoginResponse {
                two_factor: None,
                must_change_password: user.must_change_password,
                redirect_to: outcome.redirect_to,
            }),
        )
            .into_response();
    };

    // Second factor outstanding: park the user id and remember flag in a
    // fresh pending session and point the client at the right factor.
    if let Some(hash) = previous_hash.as_deref() {
        if let Err(err) = storage::delete_session(&pool, hash).await {
            error!("Failed to drop pre-login session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let data = SessionData {
        twofa_user_id: Some(user.id),
        twofa_remember: request.remember,
        redirect_to: request.redirect_to.clone(),
        ..SessionData::default()
    };
    let ttl_seconds = auth_state.config().two_factor_ttl_seconds();
    let token =
        match storage::insert_session(&pool, SessionKind::TwoFactor, None, &data, ttl_seconds)
            .await
        {
            Ok(token) => token,
            Err(err) => {
                error!("Failed to create two-factor session: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

    let mut response_headers = HeaderMap::new();
    match session_cookie_with_ttl(&auth_state, &token, ttl_seconds) {
        Ok(cookie) => {
            response_headers.insert(axum::http::header::SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to set two-factor session cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    info!(user_id = %user.id, method = ?method, "second factor required");
    (
        StatusCode::OK,
        response_headers,
        Json(LoginResponse {
            two_factor: Some(method),
            must_change_password: false,
            redirect_to: None,
        }),
    )
        .into_response()
}

/// Decide whether a second factor is needed and which one to ask for.
///
/// Security keys win over TOTP when both are enrolled.
async fn pick_two_factor_method(
    user: &storage::User,
    totp_service: &TotpService,
    webauthn_service: &SecurityKeyService,
) -> anyhow::Result<Option<TwoFactorMethod>> {
    if user.source.skip_local_two_fa() {
        return Ok(None);
    }
    if webauthn_service.has_keys(user.id).await? {
        return Ok(Some(TwoFactorMethod::Webauthn));
    }
    if totp_service.is_enrolled(user.id).await? {
        return Ok(Some(TwoFactorMethod::Totp));
    }
    Ok(None)
}
