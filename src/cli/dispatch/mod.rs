//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{auth, oauth};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let base_url = matches
        .get_one::<String>("base-url")
        .cloned()
        .context("missing required argument: --base-url")?;

    // Validate signing-key configuration before touching anything else
    crate::cli::commands::validate(matches).map_err(|e| anyhow::anyhow!(e))?;

    let auth_opts = auth::Options::parse(matches)?;
    let oauth_opts = oauth::Options::parse(matches)?;

    Ok(Action::Server(Box::new(Args {
        port,
        dsn,
        base_url,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        remember_ttl_seconds: auth_opts.remember_ttl_seconds,
        two_factor_ttl_seconds: auth_opts.two_factor_ttl_seconds,
        totp_seed_key: auth_opts.totp_seed_key,
        scratch_pepper: auth_opts.scratch_pepper,
        oauth_jwt_secret: oauth_opts.jwt_secret,
        oauth_signing_key_path: oauth_opts.signing_key_path,
        access_token_ttl_seconds: oauth_opts.access_token_ttl_seconds,
        refresh_token_ttl_seconds: oauth_opts.refresh_token_ttl_seconds,
        invalidate_refresh_tokens: oauth_opts.invalidate_refresh_tokens,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_config_required() {
        temp_env::with_vars(
            [
                ("FORGEID_OAUTH_JWT_SECRET", None::<&str>),
                ("FORGEID_OAUTH_SIGNING_KEY", None::<&str>),
                (
                    "FORGEID_DSN",
                    Some("postgres://user@localhost:5432/forgeid"),
                ),
                ("FORGEID_BASE_URL", Some("https://forge.example.test")),
                (
                    "FORGEID_TOTP_SEED_KEY",
                    Some("c2VlZC1rZXktc2VlZC1rZXktc2VlZC1rZXktc2VlZCE="),
                ),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["forgeid"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("--oauth-jwt-secret"));
                }
            },
        );
    }

    #[test]
    fn builds_server_action_with_defaults() {
        temp_env::with_vars(
            [
                ("FORGEID_OAUTH_SIGNING_KEY", None::<&str>),
                ("FORGEID_OAUTH_JWT_SECRET", Some("secret")),
                (
                    "FORGEID_DSN",
                    Some("postgres://user@localhost:5432/forgeid"),
                ),
                ("FORGEID_BASE_URL", Some("https://forge.example.test")),
                (
                    "FORGEID_TOTP_SEED_KEY",
                    Some("c2VlZC1rZXktc2VlZC1rZXktc2VlZC1rZXktc2VlZCE="),
                ),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["forgeid"]);
                let action = handler(&matches).expect("handler should succeed");
                let Action::Server(args) = action;
                assert_eq!(args.port, 8080);
                assert_eq!(args.base_url, "https://forge.example.test");
                assert_eq!(args.session_ttl_seconds, 43200);
                assert_eq!(args.access_token_ttl_seconds, 3600);
                assert!(args.invalidate_refresh_tokens);
                assert_eq!(args.oauth_jwt_secret.as_deref(), Some("secret"));
                assert!(args.oauth_signing_key_path.is_none());
            },
        );
    }
}
