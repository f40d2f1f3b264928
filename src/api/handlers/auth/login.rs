//! Email/password login with first-login bootstrap.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    bootstrap::{BootstrapOutcome, bootstrap_on_first_login},
    session::session_cookie,
    state::{AuthState, BootstrapMode},
    token::TokenPurpose,
    types::{LoginRequest, LoginResponse, UserSummary},
    utils::present,
};
use crate::{
    api::error::{ApiError, ErrorBody},
    store::CredentialRecord,
};

const LOGIN_SUCCESS: &str = "Login successful";
const ADMIN_CREATED: &str = "Admin account created and logged in successfully";

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; session cookie set", body = LoginResponse),
        (status = 400, description = "Missing fields or invalid account", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 500, description = "Internal error", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let (Some(email), Some(password)) = (
        present(request.email.as_deref()),
        present(request.password.as_deref()),
    ) else {
        return ApiError::invalid_request("Email and password are required").into_response();
    };

    match authenticate(&auth_state, email, password).await {
        Ok((record, message)) => session_response(&auth_state, &record, message),
        Err(err) => err.into_response(),
    }
}

/// Run the login state machine and return the record to issue a session for.
async fn authenticate(
    auth_state: &AuthState,
    email: &str,
    password: &str,
) -> Result<(CredentialRecord, &'static str), ApiError> {
    let existing = auth_state.credentials().find_admin().await.map_err(|err| {
        error!("Failed to load admin record: {err}");
        ApiError::Internal
    })?;

    let record = match existing {
        Some(record) => record,
        None if auth_state.config().bootstrap_mode() == BootstrapMode::Disabled => {
            warn!("login attempted before an administrator was provisioned");
            return Err(ApiError::InvalidCredentials);
        }
        None => {
            match bootstrap_on_first_login(
                auth_state.credentials(),
                auth_state.hasher(),
                email,
                password,
            )
            .await
            {
                Ok(BootstrapOutcome::Created(record)) => return Ok((record, ADMIN_CREATED)),
                Ok(BootstrapOutcome::Existing(record)) => {
                    info!("lost the bootstrap race, continuing with normal login");
                    record
                }
                Err(err) => {
                    error!("Failed to bootstrap admin: {err}");
                    return Err(ApiError::Internal);
                }
            }
        }
    };

    check_credentials(auth_state, &record, email, password).await?;
    Ok((record, LOGIN_SUCCESS))
}

/// Email mismatch and password mismatch produce the same error. The email
/// must match the stored value byte for byte.
async fn check_credentials(
    auth_state: &AuthState,
    record: &CredentialRecord,
    email: &str,
    password: &str,
) -> Result<(), ApiError> {
    if record.email != email {
        // Spend the same hashing work as a real attempt before failing.
        if !record.password_hash.is_empty() {
            let _ = auth_state
                .hasher()
                .verify(&record.password_hash, password)
                .await;
        }
        return Err(ApiError::InvalidCredentials);
    }
    if record.password_hash.is_empty() {
        error!(admin_id = %record.id, "stored admin record has no password hash");
        return Err(ApiError::AccountInvalid);
    }
    if !auth_state
        .hasher()
        .verify(&record.password_hash, password)
        .await
    {
        return Err(ApiError::InvalidCredentials);
    }
    Ok(())
}

fn session_response(
    auth_state: &AuthState,
    record: &CredentialRecord,
    message: &str,
) -> Response {
    let token = match auth_state.tokens().issue(
        record.id,
        record.credential_version,
        TokenPurpose::Session,
        auth_state.config().session_ttl(),
    ) {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to issue session token: {err}");
            return ApiError::Internal.into_response();
        }
    };

    let mut headers = HeaderMap::new();
    match session_cookie(auth_state.config(), &token) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return ApiError::Internal.into_response();
        }
    }

    let body = LoginResponse {
        message: message.to_string(),
        user: UserSummary {
            id: record.id.to_string(),
        },
    };
    (StatusCode::OK, headers, Json(body)).into_response()
}
