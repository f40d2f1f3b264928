use crate::{
    api::{
        self,
        email::EmailConfig,
        handlers::auth::{AuthConfig, BootstrapMode},
    },
    blob::StorageConfig,
};
use anyhow::Result;
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::debug;
use url::Url;

pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub migrate: bool,
    pub base_url: String,
    pub jwt_secret: SecretString,
    pub admin_email: Option<String>,
    pub session_ttl_seconds: u64,
    pub reset_ttl_seconds: u64,
    pub bootstrap_mode: BootstrapMode,
    pub email_from: String,
    pub resend_api_key: Option<SecretString>,
    pub resend_api_url: String,
    pub email_timeout_seconds: u64,
    pub upload_dir: PathBuf,
    pub uploads_url: String,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("dsn", &redact_dsn(&self.dsn))
            .field("migrate", &self.migrate)
            .field("base_url", &self.base_url)
            .field("jwt_secret", &"***")
            .field("admin_email", &self.admin_email)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("reset_ttl_seconds", &self.reset_ttl_seconds)
            .field("bootstrap_mode", &self.bootstrap_mode.as_str())
            .field("email_from", &self.email_from)
            .field(
                "resend_api_key",
                &self.resend_api_key.as_ref().map(|_| "***"),
            )
            .field("resend_api_url", &self.resend_api_url)
            .field("email_timeout_seconds", &self.email_timeout_seconds)
            .field("upload_dir", &self.upload_dir)
            .field("uploads_url", &self.uploads_url)
            .finish()
    }
}

/// Hide the password of a DSN for logging.
pub(crate) fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("***")).is_ok() {
                url.to_string()
            } else {
                "***".to_string()
            }
        }
        Ok(url) => url.to_string(),
        Err(_) => "***".to_string(),
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let auth_config = AuthConfig::new(args.base_url)
        .with_admin_email(args.admin_email)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_reset_ttl_seconds(args.reset_ttl_seconds)
        .with_bootstrap_mode(args.bootstrap_mode);

    let email_config = EmailConfig::new()
        .with_from(args.email_from)
        .with_resend_api_key(args.resend_api_key)
        .with_resend_api_url(args.resend_api_url)
        .with_timeout_seconds(args.email_timeout_seconds);

    let storage = StorageConfig::new(args.upload_dir).with_public_url(args.uploads_url);

    api::new(
        args.port,
        args.dsn,
        args.migrate,
        auth_config,
        args.jwt_secret,
        email_config,
        storage,
    )
    .await
}
