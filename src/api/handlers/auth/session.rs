//! Session verification for cookie and bearer auth.
//!
//! Both carriers go through [`extract_session_token`]: an `Authorization:
//! Bearer` header wins, then the `auth_token` cookie. A token only counts as
//! a session when its signature and expiry check out, it was issued for a
//! session (not a reset), its subject is the stored administrator, and its
//! credential version matches the record.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error};

use super::{
    principal::Principal,
    state::{AuthConfig, AuthState},
    token::TokenPurpose,
    types::{VerifyResponse, VerifyTokenRequest},
};
use crate::api::error::{ApiError, ErrorBody};

pub(crate) const SESSION_COOKIE_NAME: &str = "auth_token";

#[utoipa::path(
    get,
    path = "/api/auth/verify",
    responses(
        (status = 200, description = "Session is valid", body = VerifyResponse),
        (status = 401, description = "Missing, invalid or expired session", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verify_session(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let Some(token) = extract_session_token(&headers) else {
        return ApiError::Unauthenticated.into_response();
    };
    verify_response(&auth_state, &token).await
}

#[utoipa::path(
    post,
    path = "/api/auth/verify",
    request_body = VerifyTokenRequest,
    responses(
        (status = 200, description = "Token is a valid session", body = VerifyResponse),
        (status = 401, description = "Missing, invalid or expired token", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn verify_token(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<VerifyTokenRequest>, JsonRejection>,
) -> impl IntoResponse {
    let body_token = payload
        .ok()
        .and_then(|Json(request)| request.token)
        .filter(|token| !token.trim().is_empty());
    let Some(token) = body_token.or_else(|| extract_session_token(&headers)) else {
        return ApiError::Unauthenticated.into_response();
    };
    verify_response(&auth_state, &token).await
}

async fn verify_response(auth_state: &AuthState, token: &str) -> axum::response::Response {
    match authenticate_token(auth_state, token).await {
        Ok(Some(_)) => (StatusCode::OK, Json(VerifyResponse { authenticated: true })).into_response(),
        Ok(None) => ApiError::Unauthenticated.into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 204, description = "Session cookie cleared")
    ),
    tag = "auth"
)]
pub async fn logout(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    // Tokens are stateless; clearing the cookie is all there is to do.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

/// Resolve a raw token into the administrator principal.
///
/// Returns `Ok(None)` for any token that is not a live session. Store
/// failures are the only error.
pub(crate) async fn authenticate_token(
    auth_state: &AuthState,
    token: &str,
) -> Result<Option<Principal>, ApiError> {
    let claims = match auth_state.tokens().decode(token) {
        Ok(claims) => claims,
        Err(err) => {
            debug!(reason = %err, "rejected session token");
            return Ok(None);
        }
    };
    if claims.purpose != TokenPurpose::Session {
        debug!("rejected non-session token");
        return Ok(None);
    }

    let record = match auth_state.credentials().find_by_id(claims.sub).await {
        Ok(record) => record,
        Err(err) => {
            error!("Failed to load credential record: {err}");
            return Err(ApiError::Internal);
        }
    };
    let Some(record) = record else {
        debug!("session subject no longer exists");
        return Ok(None);
    };
    if record.credential_version != claims.ver {
        debug!("session issued before the last password change");
        return Ok(None);
    }

    Ok(Some(Principal {
        admin_id: record.id,
        email: record.email,
    }))
}

/// Resolve the request's session, if any.
pub(crate) async fn authenticate_session(
    headers: &HeaderMap,
    auth_state: &AuthState,
) -> Result<Option<Principal>, ApiError> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    authenticate_token(auth_state, &token).await
}

/// Build the `HttpOnly` cookie carrying the session token.
pub(super) fn session_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let value = headers.get(COOKIE)?.to_str().ok()?;
    for pair in value.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let Some(key) = parts.next() else {
            continue;
        };
        let Some(val) = parts.next() else {
            continue;
        };
        if key.trim() == SESSION_COOKIE_NAME {
            let val = val.trim();
            return (!val.is_empty()).then(|| val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
