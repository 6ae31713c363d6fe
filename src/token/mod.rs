//! Compact signed tokens issued by the OAuth2 provider.
//!
//! Access and refresh tokens are stateless JWTs referencing a grant row; the
//! rotation counter embedded in refresh tokens is compared against the grant
//! on redemption to detect replay. ID tokens carry the OIDC claims selected
//! by the granted scopes.

pub mod jwks;
pub mod jwt;

pub use jwks::{Jwk, Jwks};
pub use jwt::{Error, IdTokenClaims, SigningKey, TokenClaims, TokenKind};
