//! Request/response types and RFC 6749 error taxonomies for the provider.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error codes for the authorize endpoint (RFC 6749 §4.1.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizeErrorCode {
    InvalidRequest,
    UnauthorizedClient,
    AccessDenied,
    UnsupportedResponseType,
    InvalidScope,
    ServerError,
    TemporarilyUnavailable,
}

impl AuthorizeErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
        }
    }
}

/// An authorize-endpoint error, delivered as redirect query parameters when a
/// validated redirect URI exists, otherwise rendered as an error page.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeError {
    pub error: AuthorizeErrorCode,
    pub error_description: String,
    pub state: String,
}

/// Error codes for the token endpoint (RFC 6749 §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessTokenErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
}

/// Token-endpoint error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessTokenError {
    pub error: AccessTokenErrorCode,
    pub error_description: String,
}

impl AccessTokenError {
    #[must_use]
    pub fn new(error: AccessTokenErrorCode, description: impl Into<String>) -> Self {
        Self {
            error,
            error_description: description.into(),
        }
    }
}

impl IntoResponse for AccessTokenError {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

/// Query/form parameters accepted by `GET /login/oauth/authorize`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub code_challenge: String,
    #[serde(default)]
    pub code_challenge_method: String,
}

/// Body of the explicit consent decision (`POST /login/oauth/grant`).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GrantRequest {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub granted: bool,
}

/// Form body of `POST /login/oauth/access_token`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct AccessTokenForm {
    #[serde(default)]
    pub grant_type: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default)]
    pub code_verifier: String,
}

/// Successful access token response (RFC 6749 §5.1).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Form body of `POST /login/oauth/introspect`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IntrospectForm {
    pub token: String,
}

/// Introspection response (RFC 7662 subset).
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct IntrospectResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

/// OIDC userinfo response subset.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserInfoResponse {
    pub sub: String,
    pub name: String,
    pub preferred_username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

/// Payload returned when interactive consent is required; the frontend
/// renders the consent screen from it and posts the decision back.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConsentRequired {
    pub consent_required: bool,
    pub application_name: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: String,
    pub nonce: String,
}

/// The authorize request stashed in the session while consent is pending.
///
/// Stored as one typed unit so the grant endpoint can cross-check the posted
/// form against exactly what the user was shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorize {
    pub client_id: String,
    pub redirect_uri: String,
    pub state: String,
    pub scope: String,
    pub nonce: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_serialize_to_rfc_values() -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(AuthorizeErrorCode::UnsupportedResponseType)?;
        assert_eq!(value, "unsupported_response_type");
        assert_eq!(AuthorizeErrorCode::InvalidRequest.as_str(), "invalid_request");

        let value = serde_json::to_value(AccessTokenErrorCode::UnsupportedGrantType)?;
        assert_eq!(value, "unsupported_grant_type");
        Ok(())
    }

    #[test]
    fn access_token_error_body_shape() -> Result<(), serde_json::Error> {
        let err = AccessTokenError::new(AccessTokenErrorCode::InvalidGrant, "grant does not exist");
        let value = serde_json::to_value(&err)?;
        assert_eq!(
            value,
            serde_json::json!({
                "error": "invalid_grant",
                "error_description": "grant does not exist",
            })
        );
        Ok(())
    }

    #[test]
    fn access_token_form_defaults_missing_fields() -> Result<(), serde_json::Error> {
        let form: AccessTokenForm =
            serde_json::from_value(serde_json::json!({ "grant_type": "authorization_code" }))?;
        assert_eq!(form.grant_type, "authorization_code");
        assert!(form.client_id.is_empty());
        assert!(form.code_verifier.is_empty());
        Ok(())
    }

    #[test]
    fn access_token_response_omits_absent_id_token() -> Result<(), serde_json::Error> {
        let response = AccessTokenResponse {
            access_token: "a".to_string(),
            token_type: "bearer".to_string(),
            expires_in: 3600,
            refresh_token: "r".to_string(),
            id_token: None,
        };
        let value = serde_json::to_value(&response)?;
        assert!(value.get("id_token").is_none());
        Ok(())
    }

    #[test]
    fn pending_authorize_round_trips() -> Result<(), serde_json::Error> {
        let pending = PendingAuthorize {
            client_id: "client".to_string(),
            redirect_uri: "https://good.com/callback".to_string(),
            state: "state".to_string(),
            scope: "openid".to_string(),
            nonce: "nonce".to_string(),
            code_challenge: "challenge".to_string(),
            code_challenge_method: "S256".to_string(),
        };
        let value = serde_json::to_value(&pending)?;
        let decoded: PendingAuthorize = serde_json::from_value(value)?;
        assert_eq!(decoded, pending);
        Ok(())
    }
}
