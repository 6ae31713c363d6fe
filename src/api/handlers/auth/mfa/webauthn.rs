//! WebAuthn assertion endpoints for the second-factor hop.
//!
//! The challenge is bound to the pending session: its id is stored in the
//! session's transient state and must come back on the verify call, so an
//! assertion can never be replayed against a different session.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};
use webauthn_rs::prelude::PublicKeyCredential;

use super::complete_two_factor_sign_in;
use crate::api::handlers::auth::{
    session::require_two_factor_session,
    state::AuthState,
    storage::update_session_data,
    types::LoginResponse,
    utils::extract_client_ip,
};
use crate::webauthn::{SecurityKeyService, SecurityKeyVerification};

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/webauthn/challenge",
    responses(
        (status = 200, description = "Assertion challenge issued"),
        (status = 401, description = "Not in a two-factor session")
    ),
    tag = "auth"
)]
pub async fn webauthn_challenge(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    webauthn_service: Extension<Arc<SecurityKeyService>>,
) -> axum::response::Response {
    let (context, user_id) = match require_two_factor_session(&headers, &pool).await {
        Ok(result) => result,
        Err(status) => return status.into_response(),
    };

    let (challenge, auth_id) = match webauthn_service.auth_begin(user_id).await {
        Ok(result) => result,
        Err(err) => {
            error!("Failed to begin WebAuthn authentication: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut data = context.row.data.clone();
    data.webauthn_auth_id = Some(auth_id);
    if let Err(err) = update_session_data(&pool, &context.token_hash, &data).await {
        error!("Failed to bind WebAuthn challenge to session: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (StatusCode::OK, Json(challenge)).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/mfa/webauthn/verify",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Signed in", body = LoginResponse),
        (status = 401, description = "Assertion rejected")
    ),
    tag = "auth"
)]
pub async fn webauthn_verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    webauthn_service: Extension<Arc<SecurityKeyService>>,
    payload: Option<Json<PublicKeyCredential>>,
) -> axum::response::Response {
    let (context, user_id) = match require_two_factor_session(&headers, &pool).await {
        Ok(result) => result,
        Err(status) => return status.into_response(),
    };

    let Some(Json(credential)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let Some(auth_id) = context.row.data.webauthn_auth_id else {
        return (StatusCode::UNAUTHORIZED, "no challenge outstanding").into_response();
    };

    let client_ip = extract_client_ip(&headers);
    let verification = match webauthn_service
        .auth_finish(auth_id, credential, client_ip.as_deref())
        .await
    {
        Ok(verification) => verification,
        Err(err) => {
            info!(user_id = %user_id, ip = ?client_ip, "WebAuthn assertion rejected: {err}");
            return (StatusCode::UNAUTHORIZED, "security key assertion rejected").into_response();
        }
    };

    let key_user = match verification {
        SecurityKeyVerification::Accepted { user_id } => user_id,
        SecurityKeyVerification::CounterRegression { user_id } => {
            // Cryptographically valid assertion with a stale counter: the
            // credential is likely cloned, refuse the login.
            warn!(user_id = %user_id, ip = ?client_ip, "security key counter regression, possible cloned authenticator");
            return (StatusCode::UNAUTHORIZED, "security key rejected").into_response();
        }
    };

    if key_user != user_id {
        warn!(user_id = %user_id, key_user = %key_user, "security key belongs to a different account");
        return (StatusCode::UNAUTHORIZED, "security key rejected").into_response();
    }

    match complete_two_factor_sign_in(&pool, &auth_state, &context, user_id).await {
        Ok((outcome, user)) => {
            info!(user_id = %user.id, "user signed in with security key");
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
            error!("Failed to finalize WebAuthn sign-in: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
