//! Persistence interfaces and records.
//!
//! Every store is an async trait so handlers can run against PostgreSQL in
//! production and the in-memory backend in tests. Both backends enforce the
//! same invariants:
//!
//! - at most one credential record (single-admin design),
//! - at most one active newsletter campaign,
//! - subscriber emails are unique after normalization.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The administrator credential. `password_hash` never leaves the server.
#[derive(Clone)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub credential_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"***")
            .field("credential_version", &self.credential_version)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Return the sole administrator record, if one exists.
    async fn find_admin(&self) -> StoreResult<Option<CredentialRecord>>;

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<CredentialRecord>>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<CredentialRecord>>;

    /// Create the administrator record.
    ///
    /// # Errors
    /// Returns [`StoreError::Conflict`] when a record already exists or the
    /// email is taken. Concurrent callers race on the store's uniqueness
    /// constraint; exactly one of them wins.
    async fn create(&self, email: &str, password_hash: &str) -> StoreResult<CredentialRecord>;

    /// Replace the password hash and bump the credential version, only if the
    /// record is still at `expected_version`.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when `id` does not match the record or
    /// its version has moved on.
    async fn update_password_hash(
        &self,
        id: Uuid,
        expected_version: i64,
        password_hash: &str,
    ) -> StoreResult<()>;
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectImage {
    pub url: String,
    #[serde(default)]
    pub caption: String,
    pub blob_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub images: Vec<ProjectImage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written by project create/update.
#[derive(Debug, Clone)]
pub struct ProjectInput {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub images: Vec<ProjectImage>,
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// All projects, newest first.
    async fn list(&self) -> StoreResult<Vec<Project>>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Project>>;

    async fn create(&self, input: ProjectInput) -> StoreResult<Project>;

    async fn update(&self, id: Uuid, input: ProjectInput) -> StoreResult<Project>;

    async fn delete(&self, id: Uuid) -> StoreResult<()>;
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub image_url: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CampaignInput {
    pub title: String,
    pub message: String,
    pub image_url: String,
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// All campaigns, newest first.
    async fn list(&self) -> StoreResult<Vec<Campaign>>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Campaign>>;

    async fn active(&self) -> StoreResult<Option<Campaign>>;

    /// Insert a new, inactive campaign.
    async fn create(&self, input: CampaignInput) -> StoreResult<Campaign>;

    /// Overwrite title/message/image and set the active flag. Setting it
    /// deactivates every other campaign in the same atomic step.
    async fn update(&self, id: Uuid, input: CampaignInput, is_active: bool)
    -> StoreResult<Campaign>;

    /// Make `id` the only active campaign.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] without touching other campaigns when
    /// `id` is unknown.
    async fn activate(&self, id: Uuid) -> StoreResult<Campaign>;

    async fn delete(&self, id: Uuid) -> StoreResult<()>;
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: Uuid,
    pub email: String,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SubscriberPage {
    pub subscribers: Vec<Subscriber>,
    pub total: i64,
}

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Insert a subscriber; `email` must already be normalized.
    ///
    /// # Errors
    /// Returns [`StoreError::Conflict`] for a duplicate email.
    async fn subscribe(&self, email: &str) -> StoreResult<Subscriber>;

    /// Newest first, skipping `offset` rows.
    async fn page(&self, offset: i64, limit: i64) -> StoreResult<SubscriberPage>;
}

/// Bundle of store handles shared by the HTTP layer.
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub subscribers: Arc<dyn SubscriberStore>,
    pool: Option<sqlx::PgPool>,
}

impl Stores {
    #[must_use]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(postgres::PgStore::new(pool.clone()));
        Self {
            credentials: store.clone(),
            projects: store.clone(),
            campaigns: store.clone(),
            subscribers: store,
            pool: Some(pool),
        }
    }

    #[must_use]
    pub fn memory() -> Self {
        let store = Arc::new(memory::MemoryStore::default());
        Self {
            credentials: store.clone(),
            projects: store.clone(),
            campaigns: store.clone(),
            subscribers: store,
            pool: None,
        }
    }

    /// The PostgreSQL pool behind these stores, `None` for the memory backend.
    #[must_use]
    pub fn pool(&self) -> Option<&sqlx::PgPool> {
        self.pool.as_ref()
    }
}
