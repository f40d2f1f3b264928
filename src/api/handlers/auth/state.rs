//! Auth configuration and shared state.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::{password::PasswordHasher, token::TokenService};
use crate::{api::email::EmailSender, store::CredentialStore};

const DEFAULT_SESSION_TTL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_RESET_TTL_SECONDS: u64 = 15 * 60;

/// Whether the first login against an empty store creates the administrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BootstrapMode {
    #[default]
    FirstLogin,
    Disabled,
}

impl BootstrapMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstLogin => "first-login",
            Self::Disabled => "disabled",
        }
    }
}

impl FromStr for BootstrapMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "first-login" => Ok(Self::FirstLogin),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("invalid bootstrap mode: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    base_url: String,
    admin_email: Option<String>,
    session_ttl_seconds: u64,
    reset_ttl_seconds: u64,
    bootstrap_mode: BootstrapMode,
}

impl AuthConfig {
    /// `base_url` is the public dashboard URL used for reset links.
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            admin_email: None,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            reset_ttl_seconds: DEFAULT_RESET_TTL_SECONDS,
            bootstrap_mode: BootstrapMode::default(),
        }
    }

    /// Address that receives password reset links.
    #[must_use]
    pub fn with_admin_email(mut self, admin_email: Option<String>) -> Self {
        self.admin_email = admin_email.filter(|email| !email.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_ttl_seconds(mut self, seconds: u64) -> Self {
        self.reset_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_bootstrap_mode(mut self, mode: BootstrapMode) -> Self {
        self.bootstrap_mode = mode;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn admin_email(&self) -> Option<&str> {
        self.admin_email.as_deref()
    }

    #[must_use]
    pub fn bootstrap_mode(&self) -> BootstrapMode {
        self.bootstrap_mode
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    #[must_use]
    pub fn reset_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_ttl_seconds)
    }

    pub(super) fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    tokens: TokenService,
    hasher: PasswordHasher,
    credentials: Arc<dyn CredentialStore>,
    email: Arc<dyn EmailSender>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        tokens: TokenService,
        hasher: PasswordHasher,
        credentials: Arc<dyn CredentialStore>,
        email: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            config,
            tokens,
            hasher,
            credentials,
            email,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    pub(crate) fn credentials(&self) -> &dyn CredentialStore {
        self.credentials.as_ref()
    }

    pub(super) fn email(&self) -> &dyn EmailSender {
        self.email.as_ref()
    }
}
