//! Scratch-code generation and verification helpers.
//!
//! The scratch code is a single-use backup factor: one code per user,
//! Argon2id-hashed with a server-side pepper, and replaced by a fresh code
//! the moment a verification succeeds.

use anyhow::{Context, Result};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::{RngCore, rngs::OsRng};

const SCRATCH_CODE_LEN: usize = 8;
const SCRATCH_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a fresh scratch code.
///
/// # Errors
/// Returns an error if the system RNG fails.
pub fn generate_scratch_code() -> Result<String> {
    let mut raw = [0u8; SCRATCH_CODE_LEN];
    OsRng
        .try_fill_bytes(&mut raw)
        .context("failed to generate scratch code")?;
    let mut code = String::with_capacity(SCRATCH_CODE_LEN);
    for byte in raw {
        let idx = usize::from(byte) % SCRATCH_CODE_ALPHABET.len();
        if let Some(&char_byte) = SCRATCH_CODE_ALPHABET.get(idx) {
            code.push(char_byte as char);
        }
    }
    Ok(code)
}

/// Normalize a scratch code for verification.
pub fn normalize_scratch_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != SCRATCH_CODE_LEN {
        return Err(anyhow::anyhow!("invalid scratch code length"));
    }

    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| SCRATCH_CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow::anyhow!("invalid scratch code characters"));
    }

    Ok(normalized)
}

/// Hash a scratch code using Argon2id with the server-side pepper.
///
/// # Errors
/// Returns an error if normalization or hashing fails.
pub fn hash_scratch_code(code: &str, pepper: &[u8]) -> Result<String> {
    let normalized = normalize_scratch_code(code)?;
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = peppered_argon2(pepper)?;
    let hash = argon2
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| anyhow::anyhow!("failed to hash scratch code"))?
        .to_string();
    Ok(hash)
}

/// Verify a scratch code against a stored hash.
///
/// # Errors
/// Returns an error if the stored hash is unparseable or Argon2 setup fails.
pub fn verify_scratch_code(code: &str, stored_hash: &str, pepper: &[u8]) -> Result<bool> {
    let Ok(normalized) = normalize_scratch_code(code) else {
        return Ok(false);
    };
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|_| anyhow::anyhow!("invalid scratch code hash"))?;
    let argon2 = peppered_argon2(pepper)?;
    Ok(argon2
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok())
}

fn peppered_argon2(pepper: &[u8]) -> Result<Argon2<'_>> {
    Argon2::new_with_secret(
        pepper,
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::default(),
    )
    .map_err(|_| anyhow::anyhow!("failed to initialize Argon2id"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{
        generate_scratch_code, hash_scratch_code, normalize_scratch_code, verify_scratch_code,
    };

    #[test]
    fn normalize_uppercases_and_strips_separators() {
        let normalized = normalize_scratch_code("abcd-efgh").unwrap();
        assert_eq!(normalized, "ABCDEFGH");
    }

    #[test]
    fn normalize_rejects_bad_lengths_and_chars() {
        assert!(normalize_scratch_code("short").is_err());
        // '0' and 'O' are excluded from the alphabet.
        assert!(normalize_scratch_code("ABCD0FGH").is_err());
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let pepper = b"pepper";
        let code = generate_scratch_code().unwrap();
        let hash = hash_scratch_code(&code, pepper).unwrap();
        assert!(verify_scratch_code(&code, &hash, pepper).unwrap());
        assert!(!verify_scratch_code("AAAA2222", &hash, pepper).unwrap());
    }

    #[test]
    fn wrong_pepper_fails_verification() {
        let code = generate_scratch_code().unwrap();
        let hash = hash_scratch_code(&code, b"pepper-a").unwrap();
        assert!(!verify_scratch_code(&code, &hash, b"pepper-b").unwrap());
    }

    #[test]
    fn malformed_input_verifies_false_not_error() {
        let code = generate_scratch_code().unwrap();
        let hash = hash_scratch_code(&code, b"pepper").unwrap();
        assert!(!verify_scratch_code("!!", &hash, b"pepper").unwrap());
    }

    #[test]
    fn regeneration_invalidates_old_code() {
        // The store keeps one hash at a time, so replacing it retires the old code.
        let pepper = b"pepper";
        let first = generate_scratch_code().unwrap();
        let mut stored = hash_scratch_code(&first, pepper).unwrap();

        assert!(verify_scratch_code(&first, &stored, pepper).unwrap());

        let second = generate_scratch_code().unwrap();
        stored = hash_scratch_code(&second, pepper).unwrap();

        assert!(!verify_scratch_code(&first, &stored, pepper).unwrap());
        assert!(verify_scratch_code(&second, &stored, pepper).unwrap());
    }
}
