//! Auth handlers and supporting modules.
//!
//! This module covers the single administrator account: login (with the
//! first-login bootstrap), session verification, logout and password reset.
//!
//! ## Sessions
//!
//! Sessions are stateless HS256 tokens (see [`token`]). Login sets them as an
//! `HttpOnly` `auth_token` cookie; protected routes also accept the same token
//! as `Authorization: Bearer`. Each token carries the administrator's
//! credential version, and a password reset bumps it.
//!
//! ## Bootstrap
//!
//! With `BootstrapMode::FirstLogin` the first login against an empty store
//! creates the administrator from the submitted email and password. With
//! `BootstrapMode::Disabled` the account must be created with the
//! `provision-admin` action.

pub mod bootstrap;
pub(crate) mod login;
pub mod password;
pub mod principal;
pub(crate) mod reset;
pub(crate) mod session;
mod state;
pub mod token;
pub(crate) mod types;
pub(crate) mod utils;

pub use bootstrap::{ProvisionError, create_admin};
pub use password::{PasswordError, PasswordHasher};
pub use principal::{Principal, require_auth};
pub use state::{AuthConfig, AuthState, BootstrapMode};
pub use token::{Claims, Clock, ManualClock, SystemClock, TokenError, TokenPurpose, TokenService};

#[cfg(test)]
mod tests;
