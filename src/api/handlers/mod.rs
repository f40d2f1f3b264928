//! API handlers and shared utilities for the admin backend.
//!
//! `auth` owns the administrator session; the content modules call
//! [`auth::require_auth`] before any write.

pub mod auth;
pub mod campaigns;
pub(crate) mod form;
pub mod health;
pub mod projects;
pub mod root;
pub mod subscribers;

use std::fmt::Display;
use tracing::error;
use uuid::Uuid;

use crate::api::error::ApiError;

/// Log a library error with `context` and collapse it into `Internal`.
pub(crate) fn internal_error<E: Display>(context: &'static str) -> impl FnOnce(E) -> ApiError {
    move |err| {
        error!("{context}: {err}");
        ApiError::Internal
    }
}

/// Record ids arrive as path or body strings; anything unparseable is
/// treated as an unknown record.
pub(crate) fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_accepts_uuid_only() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()), Some(id));
        assert_eq!(parse_id(&format!(" {id} ")), Some(id));
        assert_eq!(parse_id("64b7f0c2e4b0a1a2b3c4d5e6"), None);
        assert_eq!(parse_id(""), None);
    }

    #[test]
    fn internal_error_hides_details() {
        let err = internal_error("Failed to load")("connection refused");
        assert_eq!(err, ApiError::Internal);
        assert_eq!(err.message(), "Internal server error");
    }
}
