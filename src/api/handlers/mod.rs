//! API handlers for Forgeid.
//!
//! `auth` owns interactive sign-in, sessions, and second factors; `oauth`
//! owns the embedded OAuth2/OIDC provider; `health` reports service status.

pub mod auth;
pub mod health;
pub mod oauth;
pub mod root;
