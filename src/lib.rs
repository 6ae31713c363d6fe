//! # Forgeid (Forge Sign-In & OAuth2/OIDC Authority)
//!
//! `forgeid` is the authentication and authorization core of a self-hosted
//! software forge. It owns interactive sign-in (password plus an optional
//! second factor), server-side sessions, and an embedded OAuth2 / OpenID
//! Connect authorization server used by forge clients.
//!
//! ## Sign-in
//!
//! Password verification delegates to the user store; accounts that are
//! inactive or have sign-in prohibited are rejected with distinct errors so
//! the frontend can point at the right remediation. Users enrolled in a
//! second factor are parked in a short-lived pending session and must present
//! a TOTP passcode, a single-use scratch code, or a WebAuthn assertion before
//! a full session is issued.
//!
//! ## OAuth2 / OpenID Connect
//!
//! The provider implements the authorization-code flow with PKCE (RFC 6749 +
//! RFC 7636). PKCE is mandatory for public clients. Consent decisions are
//! persisted as grants; a grant is silently reused only when the client is
//! confidential or explicitly trusted AND the requested scope matches the
//! granted scope exactly. Refresh tokens carry a rotation counter so a
//! replayed token is detected and rejected.
//!
//! ## Sessions
//!
//! Sessions live server-side in Postgres keyed by the SHA-256 hash of an
//! opaque cookie token. Transient state for the second-factor hop and the
//! pending authorize request is one typed record serialized as a unit, and
//! the session id is regenerated whenever the privilege level changes.

pub mod api;
pub mod cli;
pub mod token;
pub mod totp;
pub mod webauthn;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
