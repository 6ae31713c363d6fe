use crate::{
    api::handlers::{auth, health, oauth, root},
    token::SigningKey,
    totp::TotpService,
    webauthn::SecurityKeyService,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, options, post},
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
// Keep these internal to the crate while allowing CLI/server wiring to reference them.
pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use crate::GIT_COMMIT_HASH;
pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
#[allow(clippy::too_many_arguments)]
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: auth::AuthConfig,
    oauth_config: oauth::OAuthConfig,
    signer: SigningKey,
    totp_seed_key: [u8; 32],
    scratch_pepper: Option<Arc<[u8]>>,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let base_url = auth_config.base_url().to_string();
    let rp_id = auth_config.totp_issuer().to_string();

    let totp_service = TotpService::new(
        pool.clone(),
        totp_seed_key,
        auth_config.totp_issuer().to_string(),
    );
    let webauthn_service = Arc::new(
        SecurityKeyService::new(pool.clone(), &rp_id, &base_url)
            .context("Failed to build WebAuthn state")?,
    );
    let auth_state = Arc::new(auth::AuthState::new(
        auth_config,
        scratch_pepper,
        Arc::new(auth::NoopRateLimiter),
    ));
    let oauth_state = Arc::new(oauth::OAuthState::new(oauth_config, signer));

    let origin = service_origin(&base_url)?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(origin))
        .allow_credentials(true);

    // Build the router from OpenAPI-wired routes, then extend it with non-doc
    // routes like `/` and preflight-only `OPTIONS /health`.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/", get(root::root))
        .route("/health", options(health::health))
        // RFC 6749 allows POSTing the authorize request; parameters still
        // arrive in the query string.
        .route(
            "/login/oauth/authorize",
            post(oauth::authorize::authorize),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state.clone()))
                .layer(Extension(oauth_state.clone()))
                .layer(Extension(totp_service.clone()))
                .layer(Extension(webauthn_service.clone()))
                .layer(Extension(pool.clone())),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn service_origin(base_url: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Base URL must include a valid host: {base_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build service origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_origin_strips_path() -> Result<()> {
        let origin = service_origin("https://forge.example.test/sub/path")?;
        assert_eq!(origin, HeaderValue::from_static("https://forge.example.test"));
        Ok(())
    }

    #[test]
    fn service_origin_keeps_port() -> Result<()> {
        let origin = service_origin("http://localhost:3000")?;
        assert_eq!(origin, HeaderValue::from_static("http://localhost:3000"));
        Ok(())
    }

    #[test]
    fn service_origin_rejects_garbage() {
        assert!(service_origin("not a url").is_err());
    }
}
