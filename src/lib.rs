//! # Studio Admin
//!
//! `studio-admin` is the backend of a design studio's admin dashboard. It
//! manages portfolio projects, newsletter campaigns and newsletter
//! subscribers, and protects every mutating operation behind a single
//! administrator account.
//!
//! ## Authentication
//!
//! There is exactly one administrator. The account is created on the first
//! login attempt against an empty store (or out of band with the
//! `provision-admin` action when implicit bootstrap is disabled). Passwords are
//! hashed with Argon2id; sessions are stateless HS256 tokens carried in an
//! `HttpOnly` cookie or an `Authorization: Bearer` header.
//!
//! Tokens embed the credential version they were issued for. Resetting the
//! password bumps that version, which revokes every outstanding session and
//! makes the reset link single-use.
//!
//! ## Content
//!
//! Projects and campaigns carry images stored through a [`blob::BlobStore`].
//! At most one newsletter campaign is active at any time; activation is a
//! single atomic store operation.

pub mod api;
pub mod blob;
pub mod cli;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
