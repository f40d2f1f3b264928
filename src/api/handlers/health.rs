use crate::{GIT_COMMIT_HASH, store::Stores};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::Connection;
use tracing::{Instrument, debug, error, info_span};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service and database are healthy", body = Health),
        (status = 503, description = "Database is unreachable", body = Health)
    ),
    tag = "health"
)]
/// `GET` returns the report as JSON; `OPTIONS` returns only status and headers.
pub async fn health(method: Method, stores: Extension<Stores>) -> impl IntoResponse {
    let database = probe_database(&stores).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.unwrap_or_else(|status| status).to_string(),
    };

    let mut headers = HeaderMap::new();
    if let Some(value) = x_app_header(&health) {
        headers.insert("X-App", value);
    }

    let status = if database.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    debug!(database = %health.database, "health check");

    if method == Method::GET {
        (status, headers, Json(health)).into_response()
    } else {
        (status, headers, Body::empty()).into_response()
    }
}

/// `Ok("ok")` for a reachable pool, `Ok("memory")` for the in-process stores.
async fn probe_database(stores: &Stores) -> Result<&'static str, &'static str> {
    let Some(pool) = stores.pool() else {
        return Ok("memory");
    };

    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let mut conn = pool.acquire().instrument(acquire_span).await.map_err(|err| {
        error!("Failed to acquire database connection: {err}");
        "error"
    })?;

    let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
    conn.ping().instrument(ping_span).await.map_err(|err| {
        error!("Failed to ping database: {err}");
        "error"
    })?;

    Ok("ok")
}

/// `name:version:shortcommit`
fn x_app_header(health: &Health) -> Option<HeaderValue> {
    let short_hash = health.commit.get(..7).unwrap_or_default();
    HeaderValue::from_str(&format!("{}:{}:{short_hash}", health.name, health.version))
        .map_err(|err| error!("Failed to build X-App header: {err}"))
        .ok()
}
