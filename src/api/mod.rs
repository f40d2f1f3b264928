use crate::{
    api::handlers::{auth, health, root},
    blob::{BlobStore, LocalBlobStore, StorageConfig},
    store::{Stores, postgres},
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, options},
};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    services::ServeDir,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod email;
pub mod error;
pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Multipart uploads carry several images.
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// DSN that selects the in-process stores instead of PostgreSQL.
pub const MEMORY_DSN: &str = "memory://";

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    migrate: bool,
    auth_config: auth::AuthConfig,
    jwt_secret: SecretString,
    email_config: email::EmailConfig,
    storage: StorageConfig,
) -> Result<()> {
    let stores = connect(&dsn, migrate).await?;

    let tokens = auth::TokenService::new(&jwt_secret, Arc::new(auth::SystemClock))
        .context("Invalid JWT secret")?;
    let email_sender = email_config
        .sender()
        .context("Failed to configure email delivery")?;
    let auth_state = Arc::new(auth::AuthState::new(
        auth_config,
        tokens,
        auth::PasswordHasher::default(),
        stores.credentials.clone(),
        email_sender,
    ));

    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(
        storage.upload_dir(),
        storage.public_url(),
    ));

    let app = app(
        stores,
        auth_state,
        blobs,
        Some(storage.upload_dir().to_path_buf()),
    )?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Assemble the full HTTP application.
///
/// `uploads_dir`, when set, is served read-only at `/uploads`.
///
/// # Errors
/// Returns an error when the configured base URL has no usable origin.
pub fn app(
    stores: Stores,
    auth_state: Arc<auth::AuthState>,
    blobs: Arc<dyn BlobStore>,
    uploads_dir: Option<PathBuf>,
) -> Result<Router> {
    let frontend_origin = frontend_origin(auth_state.config().base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    // Build the router from OpenAPI-wired routes, then extend it with non-doc routes like `/` and
    // preflight-only `OPTIONS /health`.
    let (router, _openapi) = router().split_for_parts();
    let mut router = router
        .route("/", get(root::root))
        .route("/health", options(health::health));
    if let Some(dir) = uploads_dir {
        router = router.nest_service("/uploads", ServeDir::new(dir));
    }

    let app = router.layer(
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
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(Extension(auth_state))
            .layer(Extension(blobs))
            .layer(Extension(stores)),
    );

    Ok(app)
}

/// Open the stores selected by `dsn`, applying the schema first when `migrate` is set.
///
/// # Errors
/// Returns an error when the database is unreachable or the schema fails to apply.
pub async fn connect(dsn: &str, migrate: bool) -> Result<Stores> {
    if dsn == MEMORY_DSN {
        warn!("Using in-memory stores, data is lost on restart");
        return Ok(Stores::memory());
    }

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    if migrate {
        postgres::apply_schema(&pool)
            .await
            .context("Failed to apply database schema")?;
        info!("Database schema applied");
    }

    Ok(Stores::postgres(pool))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
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

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_strips_path() -> Result<()> {
        let origin = frontend_origin("https://studio.example.com/admin/")?;
        assert_eq!(origin, "https://studio.example.com");

        let origin = frontend_origin("http://localhost:3000")?;
        assert_eq!(origin, "http://localhost:3000");
        Ok(())
    }

    #[test]
    fn frontend_origin_requires_host() {
        assert!(frontend_origin("not a url").is_err());
        assert!(frontend_origin("mailto:admin@example.com").is_err());
    }
}
