//! Token endpoint: authorization-code and refresh-token exchange.

use axum::{
    Form, Json,
    extract::{Extension, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header::{AUTHORIZATION, CACHE_CONTROL}},
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, warn};

use super::{
    models::Grant,
    state::OAuthState,
    storage,
    types::{AccessTokenError, AccessTokenErrorCode, AccessTokenForm, AccessTokenResponse},
};
use crate::api::handlers::auth::storage as user_storage;
use crate::token::{self, IdTokenClaims, SigningKey, TokenClaims, TokenKind};

#[utoipa::path(
    post,
    path = "/login/oauth/access_token",
    request_body = AccessTokenForm,
    responses(
        (status = 200, description = "Token triple issued", body = AccessTokenResponse),
        (status = 400, description = "RFC 6749 error body", body = AccessTokenError)
    ),
    tag = "oauth"
)]
pub async fn access_token(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    oauth_state: Extension<Arc<OAuthState>>,
    form: Result<Form<AccessTokenForm>, FormRejection>,
) -> Response {
    let Ok(Form(form)) = form else {
        return AccessTokenError::new(
            AccessTokenErrorCode::InvalidRequest,
            "cannot parse form body",
        )
        .into_response();
    };

    let auth_header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let (client_id, client_secret) =
        match resolve_client_credentials(&form.client_id, &form.client_secret, auth_header) {
            Ok(credentials) => credentials,
            Err(err) => return err.into_response(),
        };

    // Under symmetric signing each client verifies its ID tokens with its own
    // secret; asymmetric setups share the server key pair.
    let server_key = oauth_state.signer().clone();
    let client_key = server_key.for_client_secret(&client_secret);

    let response = match form.grant_type.as_str() {
        "refresh_token" => {
            handle_refresh_token(
                &pool,
                &oauth_state,
                &form,
                &client_id,
                &client_secret,
                &server_key,
                &client_key,
            )
            .await
        }
        "authorization_code" => {
            handle_authorization_code(
                &pool,
                &oauth_state,
                &form,
                &client_id,
                &client_secret,
                &server_key,
                &client_key,
            )
            .await
        }
        _ => Err(AccessTokenError::new(
            AccessTokenErrorCode::UnsupportedGrantType,
            "Only refresh_token or authorization_code grant type is supported",
        )),
    };

    match response {
        Ok(token_response) => {
            let mut response_headers = HeaderMap::new();
            response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            (StatusCode::OK, response_headers, Json(token_response)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// Merge body credentials with the Basic Authorization header.
///
/// Fields present in both places must agree exactly; a mismatch is an
/// `invalid_request`, never resolved by precedence.
fn resolve_client_credentials(
    form_client_id: &str,
    form_client_secret: &str,
    auth_header: Option<&str>,
) -> Result<(String, String), AccessTokenError> {
    let mut client_id = form_client_id.to_string();
    let mut client_secret = form_client_secret.to_string();

    if client_id.is_empty() || client_secret.is_empty() {
        if let Some((header_id, header_secret)) = auth_header.and_then(parse_basic_auth_header) {
            if !client_id.is_empty() && client_id != header_id {
                return Err(AccessTokenError::new(
                    AccessTokenErrorCode::InvalidRequest,
                    "client_id in request body inconsistent with Authorization header",
                ));
            }
            client_id = header_id;
            if !client_secret.is_empty() && client_secret != header_secret {
                return Err(AccessTokenError::new(
                    AccessTokenErrorCode::InvalidRequest,
                    "client_secret in request body inconsistent with Authorization header",
                ));
            }
            client_secret = header_secret;
        } else if auth_header.is_some_and(is_basic_auth_header) {
            return Err(AccessTokenError::new(
                AccessTokenErrorCode::InvalidRequest,
                "cannot parse basic auth header",
            ));
        }
    }

    Ok((client_id, client_secret))
}

fn is_basic_auth_header(header: &str) -> bool {
    header
        .split_once(' ')
        .is_some_and(|(auth_type, _)| auth_type.eq_ignore_ascii_case("Basic"))
}

pub(super) fn parse_basic_auth_header(header: &str) -> Option<(String, String)> {
    let (auth_type, payload) = header.split_once(' ')?;
    if !auth_type.eq_ignore_ascii_case("Basic") {
        return None;
    }
    let decoded = STANDARD.decode(payload.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

#[allow(clippy::too_many_arguments)]
async fn handle_refresh_token(
    pool: &PgPool,
    oauth_state: &OAuthState,
    form: &AccessTokenForm,
    client_id: &str,
    client_secret: &str,
    server_key: &SigningKey,
    client_key: &SigningKey,
) -> Result<AccessTokenResponse, AccessTokenError> {
    let app = storage::get_application_by_client_id(pool, client_id)
        .await
        .map_err(|err| {
            error!("Failed to load application: {err}");
            AccessTokenError::new(
                AccessTokenErrorCode::InvalidClient,
                format!("cannot load client with client id: {client_id:?}"),
            )
        })?
        .ok_or_else(|| {
            AccessTokenError::new(
                AccessTokenErrorCode::InvalidClient,
                format!("cannot load client with client id: {client_id:?}"),
            )
        })?;

    // The server must keep requiring client authentication for confidential
    // clients (RFC 6749 §6).
    if app.confidential_client && !app.validate_client_secret(client_secret) {
        let error_description = if client_secret.is_empty() {
            "invalid empty client secret"
        } else {
            "invalid client secret"
        };
        return Err(AccessTokenError::new(
            AccessTokenErrorCode::InvalidClient,
            error_description,
        ));
    }

    let now = Utc::now().timestamp();
    let claims = token::jwt::verify_token_claims(&form.refresh_token, server_key, now)
        .ok()
        .filter(|claims| claims.kind == TokenKind::Refresh)
        .ok_or_else(|| {
            AccessTokenError::new(
                AccessTokenErrorCode::UnauthorizedClient,
                "unable to parse refresh token",
            )
        })?;

    // Load the grant before the counter moves.
    let grant = storage::get_grant_by_id(pool, claims.grant_id)
        .await
        .map_err(|err| {
            error!("Failed to load grant: {err}");
            AccessTokenError::new(AccessTokenErrorCode::InvalidGrant, "grant does not exist")
        })?
        .ok_or_else(|| {
            AccessTokenError::new(AccessTokenErrorCode::InvalidGrant, "grant does not exist")
        })?;

    // A counter mismatch means this token was already redeemed once.
    if oauth_state.config().invalidate_refresh_tokens()
        && (grant.counter != claims.counter || claims.counter == 0)
    {
        warn!(
            grant_id = %grant.id,
            token_counter = claims.counter,
            grant_counter = grant.counter,
            "refresh token replay detected, rejecting"
        );
        return Err(AccessTokenError::new(
            AccessTokenErrorCode::UnauthorizedClient,
            "token was already used",
        ));
    }

    new_access_token_response(pool, oauth_state, grant, server_key, client_key).await
}

#[allow(clippy::too_many_arguments)]
async fn handle_authorization_code(
    pool: &PgPool,
    oauth_state: &OAuthState,
    form: &AccessTokenForm,
    client_id: &str,
    client_secret: &str,
    server_key: &SigningKey,
    client_key: &SigningKey,
) -> Result<AccessTokenResponse, AccessTokenError> {
    let app = storage::get_application_by_client_id(pool, client_id)
        .await
        .map_err(|err| {
            error!("Failed to load application: {err}");
            AccessTokenError::new(
                AccessTokenErrorCode::InvalidClient,
                format!("cannot load client with client id: '{client_id}'"),
            )
        })?
        .ok_or_else(|| {
            AccessTokenError::new(
                AccessTokenErrorCode::InvalidClient,
                format!("cannot load client with client id: '{client_id}'"),
            )
        })?;

    if app.confidential_client && !app.validate_client_secret(client_secret) {
        let error_description = if client_secret.is_empty() {
            "invalid empty client secret"
        } else {
            "invalid client secret"
        };
        return Err(AccessTokenError::new(
            AccessTokenErrorCode::UnauthorizedClient,
            error_description,
        ));
    }

    if !form.redirect_uri.is_empty() && !app.contains_redirect_uri(&form.redirect_uri) {
        return Err(AccessTokenError::new(
            AccessTokenErrorCode::UnauthorizedClient,
            "unexpected redirect URI",
        ));
    }

    // Check-and-delete: the code row is gone from here on, whatever happens
    // next, so a second redemption can never succeed.
    let consumed = storage::consume_authorization_code(pool, &form.code)
        .await
        .map_err(|err| {
            error!("Failed to consume authorization code: {err}");
            AccessTokenError::new(
                AccessTokenErrorCode::InvalidRequest,
                "cannot proceed your request",
            )
        })?;
    let Some((authorization_code, grant)) = consumed else {
        return Err(AccessTokenError::new(
            AccessTokenErrorCode::UnauthorizedClient,
            "client is not authorized",
        ));
    };

    // PKCE: the verifier must match the challenge bound at authorization time.
    if !authorization_code.validate_code_challenge(&form.code_verifier) {
        return Err(AccessTokenError::new(
            AccessTokenErrorCode::UnauthorizedClient,
            "failed PKCE code challenge",
        ));
    }

    if grant.application_id != app.id {
        return Err(AccessTokenError::new(
            AccessTokenErrorCode::InvalidGrant,
            "invalid grant",
        ));
    }

    new_access_token_response(pool, oauth_state, grant, server_key, client_key).await
}

/// Mint the access/refresh/ID token triple for a grant.
async fn new_access_token_response(
    pool: &PgPool,
    oauth_state: &OAuthState,
    mut grant: Grant,
    server_key: &SigningKey,
    client_key: &SigningKey,
) -> Result<AccessTokenResponse, AccessTokenError> {
    let config = oauth_state.config();

    // Advance the rotation counter first so the refresh token handed out
    // below is the only one matching the grant.
    if config.invalidate_refresh_tokens() {
        grant.counter = storage::increase_grant_counter(pool, grant.id)
            .await
            .map_err(|err| {
                error!("Failed to increase grant counter: {err}");
                AccessTokenError::new(
                    AccessTokenErrorCode::InvalidGrant,
                    "cannot increase the grant counter",
                )
            })?;
    }

    let now = Utc::now().timestamp();
    let access_expiry = now + config.access_token_ttl_seconds();

    let access_claims = TokenClaims {
        kind: TokenKind::Access,
        grant_id: grant.id,
        counter: 0,
        exp: access_expiry,
        iat: now,
    };
    let access_token = token::jwt::sign(server_key, &access_claims).map_err(|err| {
        error!("Failed to sign access token: {err}");
        AccessTokenError::new(AccessTokenErrorCode::InvalidRequest, "cannot sign token")
    })?;

    let refresh_claims = TokenClaims {
        kind: TokenKind::Refresh,
        grant_id: grant.id,
        counter: grant.counter,
        exp: now + config.refresh_token_ttl_seconds(),
        iat: now,
    };
    let refresh_token = token::jwt::sign(server_key, &refresh_claims).map_err(|err| {
        error!("Failed to sign refresh token: {err}");
        AccessTokenError::new(AccessTokenErrorCode::InvalidRequest, "cannot sign token")
    })?;

    let id_token = if grant.scope_contains("openid") {
        Some(mint_id_token(pool, oauth_state, &grant, client_key, now, access_expiry).await?)
    } else {
        None
    };

    Ok(AccessTokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in: config.access_token_ttl_seconds(),
        refresh_token,
        id_token,
    })
}

async fn mint_id_token(
    pool: &PgPool,
    oauth_state: &OAuthState,
    grant: &Grant,
    client_key: &SigningKey,
    now: i64,
    expiry: i64,
) -> Result<String, AccessTokenError> {
    let app = storage::get_application_by_id(pool, grant.application_id)
        .await
        .ok()
        .flatten()
        .ok_or_else(|| {
            AccessTokenError::new(
                AccessTokenErrorCode::InvalidRequest,
                "cannot find application",
            )
        })?;
    let user = user_storage::get_user(pool, grant.user_id)
        .await
        .map_err(|err| {
            error!("Error loading user: {err}");
            AccessTokenError::new(AccessTokenErrorCode::InvalidRequest, "server error")
        })?
        .ok_or_else(|| {
            AccessTokenError::new(AccessTokenErrorCode::InvalidRequest, "cannot find user")
        })?;

    let mut claims = IdTokenClaims {
        iss: oauth_state.config().issuer().to_string(),
        sub: user.id.to_string(),
        aud: app.client_id.clone(),
        exp: expiry,
        iat: now,
        nonce: grant.nonce.clone(),
        ..IdTokenClaims::default()
    };

    if grant.scope_contains("profile") {
        let display_name = if user.full_name.is_empty() {
            user.username.clone()
        } else {
            user.full_name.clone()
        };
        claims.name = Some(display_name);
        claims.preferred_username = Some(user.username.clone());
        claims.profile = Some(format!(
            "{}/{}",
            oauth_state.config().issuer(),
            user.username
        ));
        claims.picture = user.avatar_url.clone();
        if !user.language.is_empty() {
            claims.locale = Some(user.language.clone());
        }
        claims.updated_at = Some(grant.updated_at.timestamp());
    }
    if grant.scope_contains("email") {
        claims.email = Some(user.email.clone());
        claims.email_verified = Some(user.is_active);
    }
    if grant.scope_contains("groups") {
        let groups = storage::user_group_names(pool, user.id).await.map_err(|err| {
            error!("Failed to load groups for user: {err}");
            AccessTokenError::new(AccessTokenErrorCode::InvalidRequest, "server error")
        })?;
        claims.groups = Some(groups);
    }

    token::jwt::sign(client_key, &claims).map_err(|err| {
        error!("Failed to sign ID token: {err}");
        AccessTokenError::new(AccessTokenErrorCode::InvalidRequest, "cannot sign token")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_header(id: &str, secret: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")))
    }

    #[test]
    fn credentials_from_body_only() {
        let result = resolve_client_credentials("client", "secret", None);
        assert_eq!(
            result.ok(),
            Some(("client".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn credentials_from_header_only() {
        let header = basic_header("client", "secret");
        let result = resolve_client_credentials("", "", Some(&header));
        assert_eq!(
            result.ok(),
            Some(("client".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn consistent_body_and_header_are_accepted() {
        let header = basic_header("client", "secret");
        let result = resolve_client_credentials("client", "", Some(&header));
        assert_eq!(
            result.ok(),
            Some(("client".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn mismatched_client_id_is_invalid_request() {
        let header = basic_header("other", "secret");
        let err = resolve_client_credentials("client", "", Some(&header))
            .expect_err("mismatch must fail");
        assert!(matches!(err.error, AccessTokenErrorCode::InvalidRequest));
        assert!(err.error_description.contains("client_id"));
    }

    #[test]
    fn mismatched_client_secret_is_invalid_request() {
        let header = basic_header("client", "other");
        let err = resolve_client_credentials("", "secret", Some(&header))
            .expect_err("mismatch must fail");
        assert!(matches!(err.error, AccessTokenErrorCode::InvalidRequest));
        assert!(err.error_description.contains("client_secret"));
    }

    #[test]
    fn malformed_basic_header_is_invalid_request() {
        let err = resolve_client_credentials("", "", Some("Basic not-base64!!"))
            .expect_err("malformed header must fail");
        assert!(matches!(err.error, AccessTokenErrorCode::InvalidRequest));
        assert!(err.error_description.contains("basic auth"));
    }

    #[test]
    fn non_basic_header_is_ignored() {
        let result = resolve_client_credentials("client", "secret", Some("Bearer token"));
        assert_eq!(
            result.ok(),
            Some(("client".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn parse_basic_auth_header_round_trip() {
        let header = basic_header("id", "se:cret");
        // Secrets may contain colons; only the first one splits.
        assert_eq!(
            parse_basic_auth_header(&header),
            Some(("id".to_string(), "se:cret".to_string()))
        );
        assert_eq!(parse_basic_auth_header("Bearer abc"), None);
        assert_eq!(parse_basic_auth_header("Basic !!"), None);
    }
}
