//! WebAuthn security keys as a second factor.

pub mod models;
pub mod repo;
pub mod service;

pub use service::{SecurityKeyService, SecurityKeyVerification};
