//! Argon2id password hashing.
//!
//! Hashes are PHC strings with a fresh random salt per call. Work runs on the
//! blocking pool so a login never stalls the async workers.

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier as _, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use thiserror::Error;
use tokio::task;

/// 19 MiB, 2 passes, 1 lane.
const DEFAULT_MEMORY_KIB: u32 = 19 * 1024;
const DEFAULT_ITERATIONS: u32 = 2;
const DEFAULT_PARALLELISM: u32 = 1;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password must not be empty")]
    Empty,
    #[error("invalid argon2 parameters")]
    Params,
    #[error("failed to hash password")]
    Hash,
    #[error("hashing task failed")]
    Join(#[from] task::JoinError),
}

#[derive(Clone, Debug)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    /// Build a hasher with explicit cost parameters.
    ///
    /// # Errors
    /// Returns [`PasswordError::Params`] when argon2 rejects the combination.
    pub fn with_cost(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    ) -> Result<Self, PasswordError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|_| PasswordError::Params)?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash `plaintext` into a PHC string.
    ///
    /// # Errors
    /// Fails for empty input or when the blocking task cannot complete.
    pub async fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        if plaintext.is_empty() {
            return Err(PasswordError::Empty);
        }
        let hasher = self.clone();
        let plaintext = plaintext.to_string();
        task::spawn_blocking(move || hasher.hash_blocking(&plaintext)).await?
    }

    /// `false` for empty input, malformed hashes, or a mismatch.
    pub async fn verify(&self, hash: &str, plaintext: &str) -> bool {
        if hash.is_empty() || plaintext.is_empty() {
            return false;
        }
        let hasher = self.clone();
        let hash = hash.to_string();
        let plaintext = plaintext.to_string();
        task::spawn_blocking(move || hasher.verify_blocking(&hash, &plaintext))
            .await
            .unwrap_or(false)
    }

    fn hash_blocking(&self, plaintext: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|_| PasswordError::Hash)?
            .to_string();
        Ok(hash)
    }

    fn verify_blocking(&self, hash: &str, plaintext: &str) -> bool {
        // Verification uses the parameters embedded in the PHC string.
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        self.argon2()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            params: Params::new(
                DEFAULT_MEMORY_KIB,
                DEFAULT_ITERATIONS,
                DEFAULT_PARALLELISM,
                None,
            )
            .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> PasswordHasher {
    PasswordHasher {
        params: Params::new(Params::MIN_M_COST, 1, 1, None).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[tokio::test]
    async fn hash_then_verify() -> Result<()> {
        let hasher = test_hasher();
        let hash = hasher.hash("secret1").await?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify(&hash, "secret1").await);
        assert!(!hasher.verify(&hash, "secret2").await);
        assert!(!hasher.verify(&hash, "").await);
        Ok(())
    }

    #[tokio::test]
    async fn salts_differ_between_calls() -> Result<()> {
        let hasher = test_hasher();
        let first = hasher.hash("same").await?;
        let second = hasher.hash("same").await?;
        assert_ne!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_hashes_never_verify() {
        let hasher = test_hasher();
        assert!(!hasher.verify("", "secret").await);
        assert!(!hasher.verify("not-a-phc-string", "secret").await);
        assert!(!hasher.verify("$2b$10$abcdefghijklmnopqrstuv", "secret").await);
    }

    #[tokio::test]
    async fn empty_plaintext_is_rejected() {
        let hasher = test_hasher();
        assert!(matches!(hasher.hash("").await, Err(PasswordError::Empty)));
    }

    #[test]
    fn invalid_cost_is_rejected() {
        assert!(matches!(
            PasswordHasher::with_cost(1, 1, 1),
            Err(PasswordError::Params)
        ));
        assert!(PasswordHasher::with_cost(Params::MIN_M_COST, 1, 1).is_ok());
    }
}
