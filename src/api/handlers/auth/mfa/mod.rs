//! Second-factor verification handlers.
//!
//! Flow Overview:
//! 1) Password sign-in parks the user in a pending session.
//! 2) The client presents a TOTP passcode, a scratch code, or a WebAuthn
//!    assertion against that session.
//! 3) A successful factor check finalizes the sign-in: the pending session is
//!    replaced by a full one and the transient state is gone.
//!
//! Security boundaries:
//! - A passcode equal to the last accepted one is refused (exact replay guard).
//! - The scratch code is single use and regenerated on every successful use.
//! - A security-key counter that did not strictly increase fails the login.

pub(crate) mod scratch;
pub(crate) mod webauthn;

use anyhow::{Context, Result, anyhow};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    rate_limit::{RateLimitAction, RateLimitDecision},
    session::{
        SessionContext, SignInOutcome, finalize_sign_in, require_full_session,
        require_two_factor_session,
    },
    state::AuthState,
    storage,
    types::{
        LoginResponse, ScratchVerifyRequest, ScratchVerifyResponse, TotpEnrollFinishRequest,
        TotpEnrollFinishResponse, TotpEnrollStartResponse, TotpVerifyRequest,
    },
    utils::extract_client_ip,
};
use crate::totp::{TotpService, TotpVerification, repo::TotpRepo};

/// Finish the sign-in a pending session was parked for.
pub(crate) async fn complete_two_factor_sign_in(
    pool: &PgPool,
    auth_state: &AuthState,
    context: &SessionContext,
    user_id: Uuid,
) -> Result<(SignInOutcome, storage::User)> {
    let user = storage::get_user(pool, user_id)
        .await?
        .ok_or_else(|| anyhow!("pending session references a missing user"))?;

    let outcome = finalize_sign_in(
        pool,
        auth_state,
        &user,
        context.row.data.twofa_remember,
        Some(context.token_hash.as_slice()),
        &context.row.data,
        None,
    )
    .await
    .context("failed to finalize two-factor sign-in")?;

    Ok((outcome, user))
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/totp/verify",
    request_body = TotpVerifyRequest,
    responses(
        (status = 200, description = "Signed in", body = LoginResponse),
        (status = 401, description = "Invalid or replayed passcode"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn totp_verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    totp_service: Extension<TotpService>,
    payload: Option<Json<TotpVerifyRequest>>,
) -> axum::response::Response {
    let (context, user_id) = match require_two_factor_session(&headers, &pool).await {
        Ok(result) => result,
        Err(status) => return status.into_response(),
    };

    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::TwoFactor)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited").into_response();
    }

    match totp_service
        .verify(user_id, &request.passcode, client_ip.as_deref())
        .await
    {
        Ok(TotpVerification::Accepted) => {}
        Ok(TotpVerification::Rejected) => {
            return (StatusCode::UNAUTHORIZED, "passcode is incorrect").into_response();
        }
        Ok(TotpVerification::Replayed) => {
            // Valid-for-window but already spent; someone may be shoulder
            // surfing or replaying captured traffic.
            warn!(user_id = %user_id, ip = ?client_ip, "TOTP passcode replay rejected");
            return (StatusCode::UNAUTHORIZED, "passcode was already used").into_response();
        }
        Err(err) => {
            error!("Error verifying TOTP: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match complete_two_factor_sign_in(&pool, &auth_state, &context, user_id).await {
        Ok((outcome, user)) => {
            info!(user_id = %user.id, "user signed in with TOTP");
            (
                StatusCode::OK,
                outcome.headers,
                Json(LoginResponse {
                    two_factor: None,
                    must_change_password: user.must_change_password,
                    redirect_to: outcome.redirect_to,
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to finalize TOTP sign-in: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/scratch/verify",
    request_body = ScratchVerifyRequest,
    responses(
        (status = 200, description = "Signed in, replacement code issued", body = ScratchVerifyResponse),
        (status = 401, description = "Invalid scratch code"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
#[allow(clippy::too_many_lines)]
pub async fn scratch_verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ScratchVerifyRequest>>,
) -> axum::response::Response {
    let (context, user_id) = match require_two_factor_session(&headers, &pool).await {
        Ok(result) => result,
        Err(status) => return status.into_response(),
    };

    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::TwoFactor)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited").into_response();
    }

    let Some(pepper) = auth_state.scratch_pepper() else {
        error!("Scratch verification attempted without pepper configured");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let credential = match TotpRepo::get_active_credential(&pool, user_id).await {
        Ok(Some(credential)) => credential,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "scratch code is incorrect").into_response(),
        Err(err) => {
            error!("Failed to load TOTP credential: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let Some(stored_hash) = credential.scratch_hash.as_deref() else {
        return (StatusCode::UNAUTHORIZED, "scratch code is incorrect").into_response();
    };

    match scratch::verify_scratch_code(&request.scratch_code, stored_hash, pepper) {
        Ok(true) => {}
        Ok(false) => {
            info!(user_id = %user_id, ip = ?client_ip, "invalid scratch code");
            return (StatusCode::UNAUTHORIZED, "scratch code is incorrect").into_response();
        }
        Err(err) => {
            error!("Error verifying scratch code: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    // The presented code is spent: replace it before the session is upgraded
    // so it can never be redeemed twice.
    let (new_code, new_hash) = match scratch::generate_scratch_code()
        .and_then(|code| scratch::hash_scratch_code(&code, pepper).map(|hash| (code, hash)))
    {
        Ok(pair) => pair,
        Err(err) => {
            error!("Failed to regenerate scratch code: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Err(err) =
        TotpRepo::update_scratch_hash(&pool, credential.credential_id, &new_hash).await
    {
        error!("Failed to store replacement scratch code: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if let Err(err) = TotpRepo::log_audit(
        &pool,
        user_id,
        Some(credential.credential_id),
        "scratch_used",
        client_ip.as_deref(),
    )
    .await
    {
        error!("Failed to audit scratch use: {err}");
    }

    match complete_two_factor_sign_in(&pool, &auth_state, &context, user_id).await {
        Ok((outcome, user)) => {
            info!(user_id = %user.id, "user signed in with scratch code");
            (
                StatusCode::OK,
                outcome.headers,
                Json(ScratchVerifyResponse {
                    new_scratch_code: new_code,
                    redirect_to: outcome.redirect_to,
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to finalize scratch sign-in: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/totp/enroll/start",
    responses(
        (status = 200, description = "Enrollment started", body = TotpEnrollStartResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn totp_enroll_start(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    totp_service: Extension<TotpService>,
) -> axum::response::Response {
    let (_context, user) = match require_full_session(&headers, &pool).await {
        Ok(result) => result,
        Err(status) => return status.into_response(),
    };

    match totp_service
        .enroll_begin(user.id, &user.email, Some(user.username.clone()))
        .await
    {
        Ok((secret, otpauth_url, credential_id)) => (
            StatusCode::OK,
            Json(TotpEnrollStartResponse {
                secret,
                otpauth_url,
                credential_id: credential_id.to_string(),
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to start TOTP enrollment: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/totp/enroll/finish",
    request_body = TotpEnrollFinishRequest,
    responses(
        (status = 200, description = "Enrollment finished, scratch code issued", body = TotpEnrollFinishResponse),
        (status = 400, description = "Invalid code"),
        (status = 401, description = "Unauthorized")
    ),
    tag = "auth"
)]
pub async fn totp_enroll_finish(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    totp_service: Extension<TotpService>,
    payload: Option<Json<TotpEnrollFinishRequest>>,
) -> axum::response::Response {
    let (_context, user) = match require_full_session(&headers, &pool).await {
        Ok(result) => result,
        Err(status) => return status.into_response(),
    };

    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let Ok(credential_id) = Uuid::parse_str(&request.credential_id) else {
        return (StatusCode::BAD_REQUEST, "Invalid credential ID").into_response();
    };

    let client_ip = extract_client_ip(&headers);

    match totp_service
        .enroll_confirm(user.id, credential_id, &request.passcode, client_ip.as_deref())
        .await
    {
        Ok(true) => {}
        Ok(false) => return (StatusCode::BAD_REQUEST, "Invalid TOTP code").into_response(),
        Err(err) => {
            error!("Error confirming TOTP enrollment: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    // Provision the backup factor alongside enrollment.
    let Some(pepper) = auth_state.scratch_pepper() else {
        error!("TOTP enrollment finished without scratch pepper configured");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let (scratch_code, scratch_hash) = match scratch::generate_scratch_code()
        .and_then(|code| scratch::hash_scratch_code(&code, pepper).map(|hash| (code, hash)))
    {
        Ok(pair) => pair,
        Err(err) => {
            error!("Failed to generate scratch code: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Err(err) = TotpRepo::update_scratch_hash(&pool, credential_id, &scratch_hash).await {
        error!("Failed to store scratch code: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        Json(TotpEnrollFinishResponse { scratch_code }),
    )
        .into_response()
}
