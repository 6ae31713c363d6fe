//! OAuth2 provider arguments: signing key material and token lifetimes.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_OAUTH_JWT_SECRET: &str = "oauth-jwt-secret";
pub const ARG_OAUTH_SIGNING_KEY: &str = "oauth-signing-key";
pub const ARG_ACCESS_TOKEN_TTL: &str = "oauth-access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL: &str = "oauth-refresh-token-ttl-seconds";
pub const ARG_INVALIDATE_REFRESH_TOKENS: &str = "oauth-invalidate-refresh-tokens";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OAUTH_JWT_SECRET)
                .long(ARG_OAUTH_JWT_SECRET)
                .help("Shared secret for HS256 token signing")
                .env("FORGEID_OAUTH_JWT_SECRET")
                .conflicts_with(ARG_OAUTH_SIGNING_KEY),
        )
        .arg(
            Arg::new(ARG_OAUTH_SIGNING_KEY)
                .long(ARG_OAUTH_SIGNING_KEY)
                .help("Path to an RSA private key PEM for RS256 token signing")
                .env("FORGEID_OAUTH_SIGNING_KEY"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Access token lifetime in seconds")
                .default_value("3600")
                .env("FORGEID_OAUTH_ACCESS_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL)
                .long(ARG_REFRESH_TOKEN_TTL)
                .help("Refresh token lifetime in seconds")
                .default_value("2628000")
                .env("FORGEID_OAUTH_REFRESH_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_INVALIDATE_REFRESH_TOKENS)
                .long(ARG_INVALIDATE_REFRESH_TOKENS)
                .help("Rotate the grant counter on refresh so each refresh token works once")
                .default_value("true")
                .env("FORGEID_OAUTH_INVALIDATE_REFRESH_TOKENS")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub jwt_secret: Option<String>,
    pub signing_key_path: Option<String>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub invalidate_refresh_tokens: bool,
}

impl Options {
    /// Collect the OAuth provider options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a numeric argument is missing its default.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            jwt_secret: matches.get_one::<String>(ARG_OAUTH_JWT_SECRET).cloned(),
            signing_key_path: matches.get_one::<String>(ARG_OAUTH_SIGNING_KEY).cloned(),
            access_token_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TOKEN_TTL)
                .copied()
                .context("missing access token ttl")?,
            refresh_token_ttl_seconds: matches
                .get_one::<i64>(ARG_REFRESH_TOKEN_TTL)
                .copied()
                .context("missing refresh token ttl")?,
            invalidate_refresh_tokens: matches
                .get_one::<bool>(ARG_INVALIDATE_REFRESH_TOKENS)
                .copied()
                .unwrap_or(true),
        })
    }
}
