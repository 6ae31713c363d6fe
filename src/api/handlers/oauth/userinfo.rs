//! Bearer userinfo and client-authenticated token introspection.

use axum::{
    Form, Json,
    extract::{Extension, rejection::FormRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::{
    state::OAuthState,
    storage,
    token::parse_basic_auth_header,
    types::{IntrospectForm, IntrospectResponse, UserInfoResponse},
};
use crate::api::handlers::auth::storage as user_storage;
use crate::token::{self, TokenKind};

fn bearer_challenge() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "WWW-Authenticate",
        HeaderValue::from_static(r#"Bearer realm="Forgeid OAuth2""#),
    );
    headers
}

fn basic_challenge() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "WWW-Authenticate",
        HeaderValue::from_static(r#"Basic realm="Forgeid OAuth2""#),
    );
    headers
}

#[utoipa::path(
    get,
    path = "/login/oauth/userinfo",
    responses(
        (status = 200, description = "OIDC claims for the token's user", body = UserInfoResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    tag = "oauth"
)]
pub async fn userinfo(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    oauth_state: Extension<Arc<OAuthState>>,
) -> Response {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let trimmed = value.trim();
            trimmed
                .strip_prefix("Bearer ")
                .or_else(|| trimmed.strip_prefix("bearer "))
        })
        .map(str::trim);

    let Some(bearer) = bearer else {
        return (
            StatusCode::UNAUTHORIZED,
            bearer_challenge(),
            "no valid authorization",
        )
            .into_response();
    };

    let now = Utc::now().timestamp();
    let claims = match token::jwt::verify_token_claims(bearer, oauth_state.signer(), now) {
        Ok(claims) if claims.kind == TokenKind::Access => claims,
        _ => {
            return (
                StatusCode::UNAUTHORIZED,
                bearer_challenge(),
                "no valid authorization",
            )
                .into_response();
        }
    };

    let grant = match storage::get_grant_by_id(&pool, claims.grant_id).await {
        Ok(Some(grant)) => grant,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                bearer_challenge(),
                "no valid authorization",
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to load grant: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let user = match user_storage::get_user(&pool, grant.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                bearer_challenge(),
                "no valid authorization",
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to load user: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let groups = if grant.scope_contains("groups") {
        match storage::user_group_names(&pool, user.id).await {
            Ok(groups) => Some(groups),
            Err(err) => {
                error!("Failed to load groups for user: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    } else {
        None
    };

    let display_name = if user.full_name.is_empty() {
        user.username.clone()
    } else {
        user.full_name.clone()
    };

    (
        StatusCode::OK,
        Json(UserInfoResponse {
            sub: user.id.to_string(),
            name: display_name,
            preferred_username: user.username,
            email: user.email,
            picture: user.avatar_url,
            groups,
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/login/oauth/introspect",
    request_body = IntrospectForm,
    responses(
        (status = 200, description = "Introspection result; inactive tokens yield {active: false}", body = IntrospectResponse),
        (status = 401, description = "Client authentication failed")
    ),
    tag = "oauth"
)]
pub async fn introspect(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    oauth_state: Extension<Arc<OAuthState>>,
    form: Result<Form<IntrospectForm>, FormRejection>,
) -> Response {
    // Only authenticated confidential clients may introspect.
    let credentials = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_basic_auth_header);

    let client_valid = match &credentials {
        Some((client_id, client_secret)) => {
            match storage::get_application_by_client_id(&pool, client_id).await {
                Ok(Some(app)) => app.validate_client_secret(client_secret),
                Ok(None) => false,
                Err(err) => {
                    // Likely a database problem; respond without details.
                    error!("Failed to load application for introspection: {err}");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
        }
        None => false,
    };
    if !client_valid {
        return (
            StatusCode::UNAUTHORIZED,
            basic_challenge(),
            "no valid authorization",
        )
            .into_response();
    }

    let Ok(Form(form)) = form else {
        return (StatusCode::BAD_REQUEST, "cannot parse form body").into_response();
    };

    // Any verification failure below degrades to an inactive result rather
    // than explaining what went wrong.
    let mut response = IntrospectResponse::default();
    let now = Utc::now().timestamp();
    if let Ok(claims) = token::jwt::verify_token_claims(&form.token, oauth_state.signer(), now) {
        if let Ok(Some(grant)) = storage::get_grant_by_id(&pool, claims.grant_id).await {
            if let Ok(Some(app)) = storage::get_application_by_id(&pool, grant.application_id).await
            {
                response.active = true;
                response.scope = Some(grant.scope.clone());
                response.iss = Some(oauth_state.config().issuer().to_string());
                response.aud = Some(app.client_id);
                response.sub = Some(grant.user_id.to_string());
            }
            if let Ok(Some(user)) = user_storage::get_user(&pool, grant.user_id).await {
                response.username = Some(user.username);
            }
        }
    }

    (StatusCode::OK, Json(response)).into_response()
}
