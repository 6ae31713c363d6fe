//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub remember: bool,
    /// Post-login target; dropped at finalization if it points off-site.
    #[serde(default)]
    pub redirect_to: Option<String>,
}

/// Which second factor the client should present next.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorMethod {
    Totp,
    Webauthn,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_factor: Option<TwoFactorMethod>,
    #[serde(default)]
    pub must_change_password: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub user_id: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpVerifyRequest {
    pub passcode: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ScratchVerifyRequest {
    pub scratch_code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ScratchVerifyResponse {
    /// Replacement scratch code; the presented one is gone for good.
    pub new_scratch_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpEnrollStartResponse {
    pub secret: String,
    pub otpauth_url: String,
    pub credential_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpEnrollFinishRequest {
    pub credential_id: String,
    pub passcode: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TotpEnrollFinishResponse {
    /// Backup code to stash offline; shown exactly once.
    pub scratch_code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_request_defaults_remember() -> Result<(), serde_json::Error> {
        let request: LoginRequest = serde_json::from_value(serde_json::json!({
            "login": "alice",
            "password": "hunter2",
        }))?;
        assert!(!request.remember);
        Ok(())
    }

    #[test]
    fn two_factor_method_serializes_snake_case() -> Result<(), serde_json::Error> {
        assert_eq!(
            serde_json::to_value(TwoFactorMethod::Webauthn)?,
            "webauthn"
        );
        assert_eq!(serde_json::to_value(TwoFactorMethod::Totp)?, "totp");
        Ok(())
    }

    #[test]
    fn login_response_omits_absent_fields() -> Result<(), serde_json::Error> {
        let response = LoginResponse {
            two_factor: None,
            must_change_password: false,
            redirect_to: None,
        };
        let value = serde_json::to_value(&response)?;
        assert!(value.get("two_factor").is_none());
        assert!(value.get("redirect_to").is_none());
        Ok(())
    }
}
