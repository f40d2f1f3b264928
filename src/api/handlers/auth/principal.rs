//! Authenticated principal extraction.
//!
//! Every mutating content handler calls [`require_auth`] first, before it
//! reads the request body or touches a store.

use axum::http::HeaderMap;
use uuid::Uuid;

use super::{session::authenticate_session, state::AuthState};
use crate::api::error::ApiError;

/// The administrator behind a valid session.
#[derive(Clone, Debug)]
pub struct Principal {
    pub admin_id: Uuid,
    pub email: String,
}

/// Resolve the session into a principal, or `Unauthenticated` (401).
///
/// # Errors
/// `Unauthenticated` when no live session is present, `Internal` when the
/// credential store fails.
pub async fn require_auth(headers: &HeaderMap, auth_state: &AuthState) -> Result<Principal, ApiError> {
    match authenticate_session(headers, auth_state).await? {
        Some(principal) => Ok(principal),
        None => Err(ApiError::Unauthenticated),
    }
}
