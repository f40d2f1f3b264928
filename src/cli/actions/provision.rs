use crate::{
    api::{
        self,
        handlers::auth::{PasswordHasher, ProvisionError, create_admin, utils::valid_email},
    },
    cli::actions::server::redact_dsn,
};
use anyhow::{Context, Result, bail};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

/// Out-of-band creation of the administrator, for deployments that run with
/// `--bootstrap-mode disabled`.
pub struct Args {
    pub dsn: String,
    pub migrate: bool,
    pub email: String,
    pub password: SecretString,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("dsn", &redact_dsn(&self.dsn))
            .field("migrate", &self.migrate)
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// Execute the provision action.
/// # Errors
/// Returns an error if the store is unreachable, the input is invalid, or an
/// administrator already exists.
pub async fn execute(args: Args) -> Result<()> {
    if args.dsn == api::MEMORY_DSN {
        bail!("provision-admin needs a persistent database, not {}", api::MEMORY_DSN);
    }
    if !valid_email(&args.email) {
        bail!("Invalid admin email: {}", args.email);
    }
    if args.password.expose_secret().is_empty() {
        bail!("Admin password must not be empty");
    }

    let stores = api::connect(&args.dsn, args.migrate).await?;

    let record = match create_admin(
        stores.credentials.as_ref(),
        &PasswordHasher::default(),
        &args.email,
        args.password.expose_secret(),
    )
    .await
    {
        Ok(record) => record,
        Err(ProvisionError::AlreadyExists) => bail!("An administrator already exists"),
        Err(err) => return Err(err).context("Failed to create administrator"),
    };

    info!(admin_id = %record.id, email = %record.email, "administrator provisioned");
    println!("Administrator {} created", record.email);

    Ok(())
}
