//! PostgreSQL backend (`sql/schema.sql`).

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Row, postgres::PgRow, types::Json};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::{
    Campaign, CampaignInput, CampaignStore, CredentialRecord, CredentialStore, Project,
    ProjectImage, ProjectInput, ProjectStore, StoreError, StoreResult, Subscriber, SubscriberPage,
    SubscriberStore,
};

const CAMPAIGN_ACTIVATION_LOCK_ID: i64 = 7_310_221;

const CREDENTIAL_COLUMNS: &str =
    "id, email, password_hash, credential_version, created_at, updated_at";
const PROJECT_COLUMNS: &str = "id, name, description, category, images, created_at, updated_at";
const CAMPAIGN_COLUMNS: &str = "id, title, message, image_url, is_active, created_at, updated_at";

/// Schema bundled with the binary, applied by `serve --migrate`.
pub const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Apply `SCHEMA_SQL` statement by statement.
///
/// # Errors
/// Returns the first failing statement's error.
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in split_sql_statements(SCHEMA_SQL) {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DDL",
            db.statement = statement.as_str()
        );
        sqlx::query(&statement)
            .execute(pool)
            .instrument(span)
            .await?;
    }
    Ok(())
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn db_span(operation: &'static str, statement: &str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

impl<'r> FromRow<'r, PgRow> for CredentialRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            credential_version: row.try_get("credential_version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Project {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let Json(images): Json<Vec<ProjectImage>> = row.try_get("images")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            images,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Campaign {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            message: row.try_get("message")?,
            image_url: row.try_get("image_url")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for Subscriber {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            subscribed_at: row.try_get("subscribed_at")?,
        })
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_admin(&self) -> StoreResult<Option<CredentialRecord>> {
        let query = format!("SELECT {CREDENTIAL_COLUMNS} FROM admin_credentials LIMIT 1");
        let record = sqlx::query_as::<_, CredentialRecord>(&query)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(record)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<CredentialRecord>> {
        let query = format!("SELECT {CREDENTIAL_COLUMNS} FROM admin_credentials WHERE email = $1");
        let record = sqlx::query_as::<_, CredentialRecord>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<CredentialRecord>> {
        let query = format!("SELECT {CREDENTIAL_COLUMNS} FROM admin_credentials WHERE id = $1");
        let record = sqlx::query_as::<_, CredentialRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(record)
    }

    async fn create(&self, email: &str, password_hash: &str) -> StoreResult<CredentialRecord> {
        // The fixed `slot` primary key makes a second insert fail instead of
        // adding another administrator.
        let query = format!(
            "INSERT INTO admin_credentials (id, email, password_hash) \
             VALUES ($1, $2, $3) RETURNING {CREDENTIAL_COLUMNS}"
        );
        let result = sqlx::query_as::<_, CredentialRecord>(&query)
            .bind(Uuid::new_v4())
            .bind(email)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await;

        match result {
            Ok(record) => Ok(record),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_password_hash(
        &self,
        id: Uuid,
        expected_version: i64,
        password_hash: &str,
    ) -> StoreResult<()> {
        let query = r"
            UPDATE admin_credentials
            SET password_hash = $3,
                credential_version = credential_version + 1,
                updated_at = NOW()
            WHERE id = $1 AND credential_version = $2
        ";
        let result = sqlx::query(query)
            .bind(id)
            .bind(expected_version)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for PgStore {
    async fn list(&self) -> StoreResult<Vec<Project>> {
        let query = format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at DESC");
        let projects = sqlx::query_as::<_, Project>(&query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(projects)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Project>> {
        let query = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = $1");
        let project = sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(project)
    }

    async fn create(&self, input: ProjectInput) -> StoreResult<Project> {
        let query = format!(
            "INSERT INTO projects (id, name, description, category, images) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {PROJECT_COLUMNS}"
        );
        let project = sqlx::query_as::<_, Project>(&query)
            .bind(Uuid::new_v4())
            .bind(input.name)
            .bind(input.description)
            .bind(input.category)
            .bind(Json(input.images))
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await?;
        Ok(project)
    }

    async fn update(&self, id: Uuid, input: ProjectInput) -> StoreResult<Project> {
        let query = format!(
            "UPDATE projects SET name = $2, description = $3, category = $4, images = $5, \
             updated_at = NOW() WHERE id = $1 RETURNING {PROJECT_COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .bind(input.name)
            .bind(input.description)
            .bind(input.category)
            .bind(Json(input.images))
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let query = "DELETE FROM projects WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

impl PgStore {
    async fn lock_campaigns(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<(), sqlx::Error> {
        let query = "SELECT pg_advisory_xact_lock($1)";
        sqlx::query(query)
            .bind(CAMPAIGN_ACTIVATION_LOCK_ID)
            .execute(&mut **tx)
            .instrument(db_span("SELECT", query))
            .await?;
        Ok(())
    }

    async fn deactivate_others(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
    ) -> Result<(), sqlx::Error> {
        let query = r"
            UPDATE newsletter_campaigns
            SET is_active = FALSE, updated_at = NOW()
            WHERE is_active AND id <> $1
        ";
        sqlx::query(query)
            .bind(id)
            .execute(&mut **tx)
            .instrument(db_span("UPDATE", query))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for PgStore {
    async fn list(&self) -> StoreResult<Vec<Campaign>> {
        let query = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM newsletter_campaigns ORDER BY created_at DESC"
        );
        let campaigns = sqlx::query_as::<_, Campaign>(&query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(campaigns)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Campaign>> {
        let query = format!("SELECT {CAMPAIGN_COLUMNS} FROM newsletter_campaigns WHERE id = $1");
        let campaign = sqlx::query_as::<_, Campaign>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(campaign)
    }

    async fn active(&self) -> StoreResult<Option<Campaign>> {
        let query =
            format!("SELECT {CAMPAIGN_COLUMNS} FROM newsletter_campaigns WHERE is_active LIMIT 1");
        let campaign = sqlx::query_as::<_, Campaign>(&query)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await?;
        Ok(campaign)
    }

    async fn create(&self, input: CampaignInput) -> StoreResult<Campaign> {
        let query = format!(
            "INSERT INTO newsletter_campaigns (id, title, message, image_url, is_active) \
             VALUES ($1, $2, $3, $4, FALSE) RETURNING {CAMPAIGN_COLUMNS}"
        );
        let campaign = sqlx::query_as::<_, Campaign>(&query)
            .bind(Uuid::new_v4())
            .bind(input.title)
            .bind(input.message)
            .bind(input.image_url)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await?;
        Ok(campaign)
    }

    async fn update(
        &self,
        id: Uuid,
        input: CampaignInput,
        is_active: bool,
    ) -> StoreResult<Campaign> {
        let mut tx = self.pool.begin().await?;
        Self::lock_campaigns(&mut tx).await?;

        if is_active {
            Self::deactivate_others(&mut tx, id).await?;
        }

        let query = format!(
            "UPDATE newsletter_campaigns SET title = $2, message = $3, image_url = $4, \
             is_active = $5, updated_at = NOW() WHERE id = $1 RETURNING {CAMPAIGN_COLUMNS}"
        );
        let campaign = sqlx::query_as::<_, Campaign>(&query)
            .bind(id)
            .bind(input.title)
            .bind(input.message)
            .bind(input.image_url)
            .bind(is_active)
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", &query))
            .await?;

        let Some(campaign) = campaign else {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        };
        tx.commit().await?;
        Ok(campaign)
    }

    async fn activate(&self, id: Uuid) -> StoreResult<Campaign> {
        let mut tx = self.pool.begin().await?;
        Self::lock_campaigns(&mut tx).await?;

        let exists_query = "SELECT id FROM newsletter_campaigns WHERE id = $1 FOR UPDATE";
        let exists = sqlx::query(exists_query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .instrument(db_span("SELECT", exists_query))
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        }

        Self::deactivate_others(&mut tx, id).await?;

        let query = format!(
            "UPDATE newsletter_campaigns SET is_active = TRUE, updated_at = NOW() \
             WHERE id = $1 RETURNING {CAMPAIGN_COLUMNS}"
        );
        let campaign = sqlx::query_as::<_, Campaign>(&query)
            .bind(id)
            .fetch_one(&mut *tx)
            .instrument(db_span("UPDATE", &query))
            .await?;
        tx.commit().await?;
        Ok(campaign)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let query = "DELETE FROM newsletter_campaigns WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriberStore for PgStore {
    async fn subscribe(&self, email: &str) -> StoreResult<Subscriber> {
        let query = r"
            INSERT INTO newsletter_subscribers (id, email)
            VALUES ($1, $2)
            RETURNING id, email, subscribed_at
        ";
        let result = sqlx::query_as::<_, Subscriber>(query)
            .bind(Uuid::new_v4())
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;
        match result {
            Ok(subscriber) => Ok(subscriber),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict),
            Err(err) => Err(err.into()),
        }
    }

    async fn page(&self, offset: i64, limit: i64) -> StoreResult<SubscriberPage> {
        let query = r"
            SELECT id, email, subscribed_at
            FROM newsletter_subscribers
            ORDER BY subscribed_at DESC
            OFFSET $1
            LIMIT $2
        ";
        let subscribers = sqlx::query_as::<_, Subscriber>(query)
            .bind(offset.max(0))
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;

        let count_query = "SELECT COUNT(*) AS count FROM newsletter_subscribers";
        let row = sqlx::query(count_query)
            .fetch_one(&self.pool)
            .instrument(db_span("SELECT", count_query))
            .await?;

        Ok(SubscriberPage {
            subscribers,
            total: row.get("count"),
        })
    }
}
