//! Password reset: mail a short-lived link, then accept a new password.
//!
//! The reset token embeds the credential version. Completing a reset bumps
//! that version, so the same link cannot be used twice and every session
//! issued before the change stops verifying.

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{
    state::AuthState,
    token::TokenPurpose,
    types::{ForgotPasswordRequest, MessageResponse, SetNewPasswordRequest},
    utils::present,
};
use crate::{
    api::{
        email::{reset_email, reset_link},
        error::{ApiError, ErrorBody},
    },
    store::StoreError,
};

#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset link sent", body = MessageResponse),
        (status = 400, description = "Email missing", body = ErrorBody),
        (status = 404, description = "No administrator exists", body = ErrorBody),
        (status = 500, description = "Delivery failed", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    match send_reset_link(&auth_state, &request, false).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new("Password reset link sent to admin email")),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/resend-reset-email",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset link sent again", body = MessageResponse),
        (status = 400, description = "Email missing", body = ErrorBody),
        (status = 404, description = "No administrator exists", body = ErrorBody),
        (status = 500, description = "Delivery failed", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn resend_reset_email(
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    match send_reset_link(&auth_state, &request, true).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new(
                "Password reset link resent to admin email",
            )),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Single-admin lookup: the email is required but the sole record is used,
/// and the link goes to the configured notification address.
async fn send_reset_link(
    auth_state: &AuthState,
    request: &ForgotPasswordRequest,
    resend: bool,
) -> Result<(), ApiError> {
    if present(request.email.as_deref()).is_none() {
        return Err(ApiError::invalid_request("Email is required"));
    }

    let record = auth_state
        .credentials()
        .find_admin()
        .await
        .map_err(|err| {
            error!("Failed to load admin record: {err}");
            ApiError::Internal
        })?
        .ok_or_else(|| ApiError::not_found("No admin user found"))?;

    let ttl = auth_state.config().reset_ttl();
    let token = auth_state
        .tokens()
        .issue(record.id, record.credential_version, TokenPurpose::Reset, ttl)
        .map_err(|err| {
            error!("Failed to issue reset token: {err}");
            ApiError::Internal
        })?;

    let link = reset_link(auth_state.config().base_url(), &token);
    let recipient = auth_state.config().admin_email().unwrap_or(&record.email);
    let message = reset_email(recipient, &link, ttl, resend);

    auth_state.email().send(&message).await.map_err(|err| {
        error!("Failed to send reset email: {err:#}");
        ApiError::Internal
    })?;

    info!(admin_id = %record.id, resend, "password reset link sent");
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/auth/set-new-password",
    request_body = SetNewPasswordRequest,
    responses(
        (status = 200, description = "Password replaced", body = MessageResponse),
        (status = 400, description = "Missing fields, mismatch, or bad token", body = ErrorBody),
        (status = 500, description = "Internal error", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn set_new_password(
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<SetNewPasswordRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    match complete_reset(&auth_state, &request).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new("Password reset successful")),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

async fn complete_reset(
    auth_state: &AuthState,
    request: &SetNewPasswordRequest,
) -> Result<(), ApiError> {
    let (Some(reset_token), Some(new_password), Some(confirm_password)) = (
        present(request.reset_token.as_deref()),
        present(request.new_password.as_deref()),
        present(request.confirm_password.as_deref()),
    ) else {
        return Err(ApiError::invalid_request(
            "Reset token, new password, and confirm password are required",
        ));
    };
    if new_password != confirm_password {
        return Err(ApiError::invalid_request("Passwords do not match"));
    }

    let claims = auth_state.tokens().decode(reset_token).map_err(|err| {
        debug!(reason = %err, "rejected reset token");
        ApiError::InvalidOrExpiredToken
    })?;
    if claims.purpose != TokenPurpose::Reset {
        return Err(ApiError::InvalidOrExpiredToken);
    }

    let record = auth_state
        .credentials()
        .find_by_id(claims.sub)
        .await
        .map_err(|err| {
            error!("Failed to load admin record: {err}");
            ApiError::Internal
        })?
        .ok_or(ApiError::InvalidOrExpiredToken)?;
    if record.credential_version != claims.ver {
        debug!("reset token already used or superseded");
        return Err(ApiError::InvalidOrExpiredToken);
    }

    let password_hash = auth_state.hasher().hash(new_password).await.map_err(|err| {
        error!("Failed to hash new password: {err}");
        ApiError::Internal
    })?;

    match auth_state
        .credentials()
        .update_password_hash(record.id, claims.ver, &password_hash)
        .await
    {
        Ok(()) => {
            info!(admin_id = %record.id, "administrator password reset");
            Ok(())
        }
        Err(StoreError::NotFound) => Err(ApiError::InvalidOrExpiredToken),
        Err(err) => {
            error!("Failed to update password hash: {err}");
            Err(ApiError::Internal)
        }
    }
}
