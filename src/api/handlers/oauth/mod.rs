//! Embedded OAuth2 / OpenID Connect authorization server.
//!
//! Implements the authorization-code flow with PKCE (RFC 6749 + RFC 7636):
//! the authorize endpoint validates the request and issues single-use codes,
//! the token endpoint exchanges codes and refresh tokens for signed token
//! triples, and the metadata endpoints publish discovery and JWKS documents.
//!
//! Security properties enforced here:
//! - Redirect URIs match the registration exactly; errors without a validated
//!   redirect URI render a page instead of redirecting.
//! - PKCE is mandatory for public clients.
//! - Silent reissue requires a confidential or trusted client AND an existing
//!   grant with the identical scope.
//! - Authorization codes are consumed check-and-delete; refresh tokens carry
//!   a rotation counter checked against the grant on every redemption.

pub(crate) mod authorize;
pub(crate) mod metadata;
pub(crate) mod models;
mod state;
pub(crate) mod storage;
pub(crate) mod token;
pub(crate) mod types;
pub(crate) mod userinfo;

pub use state::{OAuthConfig, OAuthState};
