//! Authorize endpoint: request validation, PKCE negotiation, silent reissue
//! vs. interactive consent, and code issuance.

use axum::{
    Json,
    extract::{Extension, Query, rejection::QueryRejection},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

use super::{
    models::{Application, Grant},
    state::OAuthState,
    storage,
    types::{
        AuthorizeError, AuthorizeErrorCode, AuthorizeRequest, ConsentRequired, GrantRequest,
        PendingAuthorize,
    },
};
use crate::api::handlers::auth::{
    session::require_full_session,
    storage::update_session_data,
};

/// What the authorize endpoint does once the request validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Reuse the existing grant and issue a code without asking again.
    SilentReissue,
    /// Ask the user; either no grant exists or the scope differs.
    Consent,
}

/// Silent reissue only for confidential or explicitly trusted clients, and
/// only when a grant with the SAME scope already exists. Untrusted public
/// clients always re-authorize (RFC 6749 §10.2), and a scope change is a new
/// consent decision, never a silent upgrade or downgrade.
fn authorize_disposition(
    app: &Application,
    existing_scope: Option<&str>,
    requested_scope: &str,
) -> Disposition {
    let trusted = app.confidential_client || app.skip_secondary_authorization;
    match existing_scope {
        Some(scope) if trusted && scope == requested_scope => Disposition::SilentReissue,
        _ => Disposition::Consent,
    }
}

#[utoipa::path(
    get,
    path = "/login/oauth/authorize",
    params(
        ("client_id" = String, Query, description = "Registered client id"),
        ("redirect_uri" = String, Query, description = "Exact registered redirect URI"),
        ("response_type" = String, Query, description = "Must be `code`"),
        ("scope" = Option<String>, Query, description = "Requested scope"),
        ("state" = Option<String>, Query, description = "Opaque client state"),
        ("nonce" = Option<String>, Query, description = "OIDC nonce"),
        ("code_challenge" = Option<String>, Query, description = "PKCE challenge"),
        ("code_challenge_method" = Option<String>, Query, description = "S256 or plain"),
    ),
    responses(
        (status = 303, description = "Code issued, redirecting back to the client"),
        (status = 200, description = "Interactive consent required", body = ConsentRequired),
        (status = 400, description = "Invalid request, rendered without redirect"),
        (status = 401, description = "Sign-in required")
    ),
    tag = "oauth"
)]
#[allow(clippy::too_many_lines)]
pub async fn authorize(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    oauth_state: Extension<Arc<OAuthState>>,
    query: Result<Query<AuthorizeRequest>, QueryRejection>,
) -> Response {
    let (context, user) = match require_full_session(&headers, &pool).await {
        Ok(result) => result,
        Err(status) => return status.into_response(),
    };

    let request = match query {
        Ok(Query(request)) => request,
        Err(rejection) => {
            return handle_authorize_error(
                AuthorizeError {
                    error: AuthorizeErrorCode::InvalidRequest,
                    error_description: format!("invalid request parameters: {rejection}"),
                    state: String::new(),
                },
                "",
            );
        }
    };

    let app = match storage::get_application_by_client_id(&pool, &request.client_id).await {
        Ok(Some(app)) => app,
        Ok(None) => {
            // No validated redirect URI exists yet, so this renders a page.
            return handle_authorize_error(
                AuthorizeError {
                    error: AuthorizeErrorCode::UnauthorizedClient,
                    error_description: "Client ID not registered".to_string(),
                    state: request.state.clone(),
                },
                "",
            );
        }
        Err(err) => {
            error!("Failed to load application: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if !app.contains_redirect_uri(&request.redirect_uri) {
        // Attacker-supplied URIs never become a redirect target.
        return handle_authorize_error(
            AuthorizeError {
                error: AuthorizeErrorCode::InvalidRequest,
                error_description: "Unregistered Redirect URI".to_string(),
                state: request.state.clone(),
            },
            "",
        );
    }

    if request.response_type != "code" {
        return handle_authorize_error(
            AuthorizeError {
                error: AuthorizeErrorCode::UnsupportedResponseType,
                error_description: "Only code response type is supported.".to_string(),
                state: request.state.clone(),
            },
            &request.redirect_uri,
        );
    }

    match request.code_challenge_method.as_str() {
        "S256" | "plain" => {}
        "" => {
            // Public clients must bind the code to themselves via PKCE
            // (RFC 8252 §8.1); without it the error is invalid_request
            // per RFC 7636 §4.4.1.
            if !app.confidential_client {
                return handle_authorize_error(
                    AuthorizeError {
                        error: AuthorizeErrorCode::InvalidRequest,
                        error_description: "PKCE is required for public clients".to_string(),
                        state: request.state.clone(),
                    },
                    &request.redirect_uri,
                );
            }
        }
        _ => {
            return handle_authorize_error(
                AuthorizeError {
                    error: AuthorizeErrorCode::InvalidRequest,
                    error_description: "unsupported code challenge method".to_string(),
                    state: request.state.clone(),
                },
                &request.redirect_uri,
            );
        }
    }

    let grant = match storage::get_grant(&pool, app.id, user.id).await {
        Ok(grant) => grant,
        Err(err) => {
            error!("Failed to load grant: {err}");
            return server_error_redirect(&request.state, &request.redirect_uri);
        }
    };

    let disposition = authorize_disposition(
        &app,
        grant.as_ref().map(|grant| grant.scope.as_str()),
        &request.scope,
    );

    if let (Disposition::SilentReissue, Some(grant)) = (disposition, grant.as_ref()) {
        return issue_code_redirect(&pool, &oauth_state, grant, &request).await;
    }

    // Interactive consent: stash the validated request in the session so the
    // grant endpoint can verify the decision matches what was shown.
    let mut data = context.row.data.clone();
    data.pending_authorize = Some(PendingAuthorize {
        client_id: app.client_id.clone(),
        redirect_uri: request.redirect_uri.clone(),
        state: request.state.clone(),
        scope: request.scope.clone(),
        nonce: request.nonce.clone(),
        code_challenge: request.code_challenge.clone(),
        code_challenge_method: request.code_challenge_method.clone(),
    });
    if let Err(err) = update_session_data(&pool, &context.token_hash, &data).await {
        error!("Failed to stash pending authorize request: {err}");
        return server_error_redirect(&request.state, &request.redirect_uri);
    }

    (
        StatusCode::OK,
        Json(ConsentRequired {
            consent_required: true,
            application_name: app.name,
            client_id: app.client_id,
            redirect_uri: request.redirect_uri,
            scope: request.scope,
            state: request.state,
            nonce: request.nonce,
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/login/oauth/grant",
    request_body = GrantRequest,
    responses(
        (status = 303, description = "Decision recorded, redirecting back to the client"),
        (status = 400, description = "Decision does not match the pending request"),
        (status = 401, description = "Sign-in required")
    ),
    tag = "oauth"
)]
#[allow(clippy::too_many_lines)]
pub async fn grant_application(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    oauth_state: Extension<Arc<OAuthState>>,
    payload: Option<Json<GrantRequest>>,
) -> Response {
    let (context, user) = match require_full_session(&headers, &pool).await {
        Ok(result) => result,
        Err(status) => return status.into_response(),
    };

    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload").into_response();
    };

    let Some(pending) = context.row.data.pending_authorize.clone() else {
        return (StatusCode::BAD_REQUEST, "no authorization request pending").into_response();
    };

    // The decision must match the stashed request exactly; anything else is a
    // forged or stale form post.
    if pending.client_id != request.client_id
        || pending.state != request.state
        || pending.redirect_uri != request.redirect_uri
    {
        return (StatusCode::BAD_REQUEST, "authorization request mismatch").into_response();
    }

    if !request.granted {
        clear_pending(&pool, &context).await;
        return handle_authorize_error(
            AuthorizeError {
                error: AuthorizeErrorCode::AccessDenied,
                error_description: "the request is denied".to_string(),
                state: pending.state.clone(),
            },
            &pending.redirect_uri,
        );
    }

    let app = match storage::get_application_by_client_id(&pool, &pending.client_id).await {
        Ok(Some(app)) => app,
        Ok(None) => {
            return (StatusCode::BAD_REQUEST, "client no longer registered").into_response();
        }
        Err(err) => {
            error!("Failed to load application: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let grant = match storage::get_grant(&pool, app.id, user.id).await {
        Ok(grant) => grant,
        Err(err) => {
            error!("Failed to load grant: {err}");
            return server_error_redirect(&pending.state, &pending.redirect_uri);
        }
    };

    let grant = match grant {
        None => match storage::create_grant(&pool, app.id, user.id, &request.scope).await {
            Ok(grant) => grant,
            Err(err) => {
                error!("Failed to create grant: {err}");
                return handle_authorize_error(
                    AuthorizeError {
                        error: AuthorizeErrorCode::ServerError,
                        error_description: "cannot create grant for user".to_string(),
                        state: pending.state.clone(),
                    },
                    &pending.redirect_uri,
                );
            }
        },
        Some(grant) if grant.scope != request.scope => {
            // Re-consent never silently merges or swaps scopes.
            info!(
                grant_id = %grant.id,
                granted = %grant.scope,
                requested = %request.scope,
                "rejecting consent with mismatched scope"
            );
            return handle_authorize_error(
                AuthorizeError {
                    error: AuthorizeErrorCode::ServerError,
                    error_description: "a grant exists with different scope".to_string(),
                    state: pending.state.clone(),
                },
                &pending.redirect_uri,
            );
        }
        Some(grant) => grant,
    };

    if !request.nonce.is_empty() {
        if let Err(err) = storage::set_grant_nonce(&pool, grant.id, &request.nonce).await {
            error!("Unable to update nonce: {err}");
        }
    }

    let code = match storage::create_authorization_code(
        &pool,
        grant.id,
        &pending.redirect_uri,
        &pending.code_challenge,
        &pending.code_challenge_method,
        oauth_state.config().authorization_code_ttl_seconds(),
    )
    .await
    {
        Ok(code) => code,
        Err(err) => {
            error!("Failed to create authorization code: {err}");
            return server_error_redirect(&pending.state, &pending.redirect_uri);
        }
    };

    clear_pending(&pool, &context).await;

    match code.redirect_uri_with_code(&pending.state) {
        Ok(redirect) => Redirect::to(redirect.as_str()).into_response(),
        Err(err) => {
            error!("Failed to build redirect: {err}");
            server_error_redirect(&pending.state, &pending.redirect_uri)
        }
    }
}

/// Issue a code against an existing grant and redirect straight back.
async fn issue_code_redirect(
    pool: &PgPool,
    oauth_state: &OAuthState,
    grant: &Grant,
    request: &AuthorizeRequest,
) -> Response {
    let code = match storage::create_authorization_code(
        pool,
        grant.id,
        &request.redirect_uri,
        &request.code_challenge,
        &request.code_challenge_method,
        oauth_state.config().authorization_code_ttl_seconds(),
    )
    .await
    {
        Ok(code) => code,
        Err(err) => {
            error!("Failed to create authorization code: {err}");
            return server_error_redirect(&request.state, &request.redirect_uri);
        }
    };

    // Update nonce to reflect the new authorization session.
    if !request.nonce.is_empty() {
        if let Err(err) = storage::set_grant_nonce(pool, grant.id, &request.nonce).await {
            error!("Unable to update nonce: {err}");
        }
    }

    match code.redirect_uri_with_code(&request.state) {
        Ok(redirect) => Redirect::to(redirect.as_str()).into_response(),
        Err(err) => {
            error!("Failed to build redirect: {err}");
            server_error_redirect(&request.state, &request.redirect_uri)
        }
    }
}

async fn clear_pending(pool: &PgPool, context: &crate::api::handlers::auth::session::SessionContext) {
    let mut data = context.row.data.clone();
    data.pending_authorize = None;
    if let Err(err) = update_session_data(pool, &context.token_hash, &data).await {
        error!("Failed to clear pending authorize request: {err}");
    }
}

fn server_error_redirect(state: &str, redirect_uri: &str) -> Response {
    handle_authorize_error(
        AuthorizeError {
            error: AuthorizeErrorCode::ServerError,
            error_description: "A server error occurred".to_string(),
            state: state.to_string(),
        },
        redirect_uri,
    )
}

/// Deliver an authorize error per RFC 6749 §4.1.2.1: as redirect query
/// parameters when a validated redirect URI is known, otherwise as a rendered
/// page so an unvalidated URI never becomes a redirect target.
fn handle_authorize_error(err: AuthorizeError, redirect_uri: &str) -> Response {
    if redirect_uri.is_empty() {
        warn!(
            error = err.error.as_str(),
            "authorization failed: {}", err.error_description
        );
        return (StatusCode::BAD_REQUEST, Html(error_page(&err))).into_response();
    }
    match authorize_error_redirect(redirect_uri, &err) {
        Ok(redirect) => Redirect::to(redirect.as_str()).into_response(),
        Err(parse_err) => {
            error!("Failed to parse redirect URI: {parse_err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn authorize_error_redirect(
    redirect_uri: &str,
    err: &AuthorizeError,
) -> Result<Url, url::ParseError> {
    let mut redirect = Url::parse(redirect_uri)?;
    redirect
        .query_pairs_mut()
        .append_pair("error", err.error.as_str())
        .append_pair("error_description", &err.error_description)
        .append_pair("state", &err.state);
    Ok(redirect)
}

fn error_page(err: &AuthorizeError) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Authorization error</title></head>\n<body>\n<h1>Authorization could not be processed</h1>\n<p>{}: {}</p>\n</body>\n</html>\n",
        escape_html(err.error.as_str()),
        escape_html(&err.error_description)
    )
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn test_app(confidential: bool, skip_secondary: bool) -> Application {
        Application {
            id: Uuid::nil(),
            name: "test".to_string(),
            client_id: "client".to_string(),
            client_secret_hash: None,
            confidential_client: confidential,
            skip_secondary_authorization: skip_secondary,
            redirect_uris: vec!["https://good.com/callback".to_string()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn confidential_client_with_same_scope_reissues_silently() {
        let app = test_app(true, false);
        assert_eq!(
            authorize_disposition(&app, Some("read"), "read"),
            Disposition::SilentReissue
        );
    }

    #[test]
    fn scope_change_forces_consent() {
        let app = test_app(true, false);
        assert_eq!(
            authorize_disposition(&app, Some("read"), "read write"),
            Disposition::Consent
        );
        assert_eq!(
            authorize_disposition(&app, Some("read write"), "read"),
            Disposition::Consent
        );
    }

    #[test]
    fn untrusted_public_client_always_consents() {
        let app = test_app(false, false);
        assert_eq!(
            authorize_disposition(&app, Some("read"), "read"),
            Disposition::Consent
        );
    }

    #[test]
    fn trusted_public_client_may_reissue() {
        let app = test_app(false, true);
        assert_eq!(
            authorize_disposition(&app, Some("read"), "read"),
            Disposition::SilentReissue
        );
    }

    #[test]
    fn missing_grant_always_consents() {
        let app = test_app(true, true);
        assert_eq!(
            authorize_disposition(&app, None, "read"),
            Disposition::Consent
        );
    }

    #[test]
    fn error_redirect_carries_rfc_parameters() -> Result<(), url::ParseError> {
        let err = AuthorizeError {
            error: AuthorizeErrorCode::AccessDenied,
            error_description: "the request is denied".to_string(),
            state: "xyz".to_string(),
        };
        let redirect = authorize_error_redirect("https://good.com/callback", &err)?;
        let query: Vec<(String, String)> = redirect
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(query.contains(&("error".to_string(), "access_denied".to_string())));
        assert!(query.contains(&(
            "error_description".to_string(),
            "the request is denied".to_string()
        )));
        assert!(query.contains(&("state".to_string(), "xyz".to_string())));
        Ok(())
    }

    #[test]
    fn error_page_escapes_description() {
        let err = AuthorizeError {
            error: AuthorizeErrorCode::InvalidRequest,
            error_description: "<script>alert(1)</script>".to_string(),
            state: String::new(),
        };
        let page = error_page(&err);
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
    }
}
