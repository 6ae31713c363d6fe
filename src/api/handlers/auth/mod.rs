//! Sign-in, session, and second-factor handlers.
//!
//! This module coordinates interactive authentication: password sign-in,
//! the pending-session hop to a second factor, and server-side session
//! management.
//!
//! Sessions are Postgres rows keyed by the SHA-256 hash of an opaque cookie
//! token. Transient flow state (pending 2FA user, WebAuthn challenge,
//! pending authorize request) lives in one typed record per session and is
//! wiped when the sign-in finalizes or the session is dropped.

pub(crate) mod login;
pub(crate) mod mfa;
mod rate_limit;
pub(crate) mod session;
mod state;
pub(crate) mod storage;
pub(crate) mod types;
mod utils;

pub use rate_limit::NoopRateLimiter;
pub use state::{AuthConfig, AuthState};
