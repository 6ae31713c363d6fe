//! OIDC discovery document and JSON Web Key Set.

use axum::{
    Json,
    extract::Extension,
    response::IntoResponse,
};
use std::sync::Arc;

use super::state::OAuthState;
use crate::token::Jwks;

/// Build the discovery document for the configured issuer.
fn discovery_document(oauth_state: &OAuthState) -> serde_json::Value {
    let issuer = oauth_state.config().issuer();
    serde_json::json!({
        "issuer": format!("{issuer}/"),
        "authorization_endpoint": format!("{issuer}/login/oauth/authorize"),
        "token_endpoint": format!("{issuer}/login/oauth/access_token"),
        "introspection_endpoint": format!("{issuer}/login/oauth/introspect"),
        "userinfo_endpoint": format!("{issuer}/login/oauth/userinfo"),
        "jwks_uri": format!("{issuer}/login/oauth/keys"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "id_token_signing_alg_values_supported": [oauth_state.signer().alg()],
        "subject_types_supported": ["public"],
        "scopes_supported": ["openid", "profile", "email", "groups"],
        "code_challenge_methods_supported": ["S256", "plain"],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
    })
}

#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    responses(
        (status = 200, description = "OIDC discovery document", content_type = "application/json")
    ),
    tag = "oauth"
)]
pub async fn openid_configuration(
    oauth_state: Extension<Arc<OAuthState>>,
) -> impl IntoResponse {
    Json(discovery_document(&oauth_state))
}

#[utoipa::path(
    get,
    path = "/login/oauth/keys",
    responses(
        (status = 200, description = "JWKS public keys", body = Jwks, content_type = "application/json")
    ),
    tag = "oauth"
)]
pub async fn keys(oauth_state: Extension<Arc<OAuthState>>) -> impl IntoResponse {
    Json(Jwks::for_signing_key(oauth_state.signer()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::oauth::state::OAuthConfig;
    use crate::token::SigningKey;

    #[test]
    fn discovery_lists_expected_endpoints() {
        let state = OAuthState::new(
            OAuthConfig::new("https://forge.example.test".to_string()),
            SigningKey::symmetric(b"secret".to_vec()),
        );
        let doc = discovery_document(&state);
        assert_eq!(
            doc.get("authorization_endpoint").and_then(serde_json::Value::as_str),
            Some("https://forge.example.test/login/oauth/authorize")
        );
        assert_eq!(
            doc.get("token_endpoint").and_then(serde_json::Value::as_str),
            Some("https://forge.example.test/login/oauth/access_token")
        );
        assert_eq!(
            doc.get("jwks_uri").and_then(serde_json::Value::as_str),
            Some("https://forge.example.test/login/oauth/keys")
        );
        assert_eq!(
            doc.get("id_token_signing_alg_values_supported"),
            Some(&serde_json::json!(["HS256"]))
        );
        assert_eq!(
            doc.get("code_challenge_methods_supported"),
            Some(&serde_json::json!(["S256", "plain"]))
        );
    }
}
