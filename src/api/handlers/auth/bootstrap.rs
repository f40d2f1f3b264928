//! Creating the administrator.
//!
//! Two entry points share [`create_admin`]: implicit creation on the first
//! login against an empty store, and the `provision-admin` CLI action. The
//! credential store's uniqueness constraint decides any race; nothing here
//! holds a lock.

use thiserror::Error;
use tracing::{error, info};

use super::password::{PasswordError, PasswordHasher};
use crate::store::{CredentialRecord, CredentialStore, StoreError};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("admin already exists")]
    AlreadyExists,
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Store(StoreError),
}

#[derive(Debug)]
pub(crate) enum BootstrapOutcome {
    /// This call created the record.
    Created(CredentialRecord),
    /// Another request won the race; continue with a normal login.
    Existing(CredentialRecord),
}

/// Hash `password` and insert the sole administrator record.
///
/// `email` is stored exactly as given; login compares it byte for byte.
///
/// # Errors
/// [`ProvisionError::AlreadyExists`] when any administrator exists.
pub async fn create_admin(
    credentials: &dyn CredentialStore,
    hasher: &PasswordHasher,
    email: &str,
    password: &str,
) -> Result<CredentialRecord, ProvisionError> {
    let password_hash = hasher.hash(password).await?;
    match credentials.create(email, &password_hash).await {
        Ok(record) => {
            info!(admin_id = %record.id, "administrator created");
            Ok(record)
        }
        Err(StoreError::Conflict) => Err(ProvisionError::AlreadyExists),
        Err(err) => Err(ProvisionError::Store(err)),
    }
}

/// First-login transition from "no admin" to "admin exists".
pub(crate) async fn bootstrap_on_first_login(
    credentials: &dyn CredentialStore,
    hasher: &PasswordHasher,
    email: &str,
    password: &str,
) -> Result<BootstrapOutcome, ProvisionError> {
    match create_admin(credentials, hasher, email, password).await {
        Ok(record) => Ok(BootstrapOutcome::Created(record)),
        Err(ProvisionError::AlreadyExists) => {
            let existing = credentials.find_admin().await.map_err(ProvisionError::Store)?;
            match existing {
                Some(record) => Ok(BootstrapOutcome::Existing(record)),
                None => {
                    error!("admin create conflicted but no admin record exists");
                    Err(ProvisionError::AlreadyExists)
                }
            }
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::password::test_hasher;
    use crate::store::Stores;
    use anyhow::Result;

    #[tokio::test]
    async fn create_admin_stores_email_verbatim_and_hashes() -> Result<()> {
        let stores = Stores::memory();
        let hasher = test_hasher();
        let record = create_admin(
            stores.credentials.as_ref(),
            &hasher,
            " Owner@Studio.Example ",
            "secret1",
        )
        .await?;
        assert_eq!(record.email, " Owner@Studio.Example ");
        assert!(hasher.verify(&record.password_hash, "secret1").await);
        Ok(())
    }

    #[tokio::test]
    async fn create_admin_refuses_second_admin() -> Result<()> {
        let stores = Stores::memory();
        let hasher = test_hasher();
        create_admin(stores.credentials.as_ref(), &hasher, "a@x.com", "one").await?;
        let second = create_admin(stores.credentials.as_ref(), &hasher, "b@x.com", "two").await;
        assert!(matches!(second, Err(ProvisionError::AlreadyExists)));
        Ok(())
    }

    #[tokio::test]
    async fn create_admin_accepts_plain_identifier() -> Result<()> {
        let stores = Stores::memory();
        let record =
            create_admin(stores.credentials.as_ref(), &test_hasher(), "admin", "pw").await?;
        assert_eq!(record.email, "admin");
        Ok(())
    }

    #[tokio::test]
    async fn bootstrap_loser_gets_existing_record() -> Result<()> {
        let stores = Stores::memory();
        let hasher = test_hasher();
        let first = bootstrap_on_first_login(
            stores.credentials.as_ref(),
            &hasher,
            "a@x.com",
            "one",
        )
        .await?;
        let BootstrapOutcome::Created(winner) = first else {
            anyhow::bail!("first bootstrap should create");
        };
        let second = bootstrap_on_first_login(
            stores.credentials.as_ref(),
            &hasher,
            "b@x.com",
            "two",
        )
        .await?;
        match second {
            BootstrapOutcome::Existing(record) => assert_eq!(record.id, winner.id),
            BootstrapOutcome::Created(_) => anyhow::bail!("second bootstrap must not create"),
        }
        Ok(())
    }
}
