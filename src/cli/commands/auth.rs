//! Sign-in and second-factor arguments: session lifetimes and key material.

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_SESSION_TTL: &str = "session-ttl-seconds";
pub const ARG_REMEMBER_TTL: &str = "remember-ttl-seconds";
pub const ARG_TWO_FACTOR_TTL: &str = "two-factor-ttl-seconds";
pub const ARG_TOTP_SEED_KEY: &str = "totp-seed-key";
pub const ARG_SCRATCH_PEPPER: &str = "scratch-pepper";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Session lifetime in seconds")
                .default_value("43200")
                .env("FORGEID_SESSION_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REMEMBER_TTL)
                .long(ARG_REMEMBER_TTL)
                .help("Session lifetime in seconds when the user asks to be remembered")
                .default_value("2592000")
                .env("FORGEID_REMEMBER_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_TWO_FACTOR_TTL)
                .long(ARG_TWO_FACTOR_TTL)
                .help("Lifetime in seconds of the pending session between password and second factor")
                .default_value("300")
                .env("FORGEID_TWO_FACTOR_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_TOTP_SEED_KEY)
                .long(ARG_TOTP_SEED_KEY)
                .help("Base64-encoded 32-byte key encrypting stored TOTP seeds")
                .env("FORGEID_TOTP_SEED_KEY")
                .required(true),
        )
        .arg(
            Arg::new(ARG_SCRATCH_PEPPER)
                .long(ARG_SCRATCH_PEPPER)
                .help("Server-side pepper mixed into scratch-code hashes")
                .env("FORGEID_SCRATCH_PEPPER"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub session_ttl_seconds: i64,
    pub remember_ttl_seconds: i64,
    pub two_factor_ttl_seconds: i64,
    pub totp_seed_key: String,
    pub scratch_pepper: Option<String>,
}

impl Options {
    /// Collect the auth options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL)
                .copied()
                .context("missing session ttl")?,
            remember_ttl_seconds: matches
                .get_one::<i64>(ARG_REMEMBER_TTL)
                .copied()
                .context("missing remember ttl")?,
            two_factor_ttl_seconds: matches
                .get_one::<i64>(ARG_TWO_FACTOR_TTL)
                .copied()
                .context("missing two-factor ttl")?,
            totp_seed_key: matches
                .get_one::<String>(ARG_TOTP_SEED_KEY)
                .cloned()
                .context("missing required argument: --totp-seed-key")?,
            scratch_pepper: matches.get_one::<String>(ARG_SCRATCH_PEPPER).cloned(),
        })
    }
}
