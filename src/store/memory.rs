//! In-process backend used by tests and `--dsn memory://`.
//!
//! Each collection sits behind its own `tokio::sync::Mutex`; every operation
//! that checks an invariant and then writes holds the lock across both steps.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    Campaign, CampaignInput, CampaignStore, CredentialRecord, CredentialStore, Project,
    ProjectInput, ProjectStore, StoreError, StoreResult, Subscriber, SubscriberPage,
    SubscriberStore,
};

#[derive(Default)]
pub struct MemoryStore {
    admin: Mutex<Option<CredentialRecord>>,
    projects: Mutex<Vec<Project>>,
    campaigns: Mutex<Vec<Campaign>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

fn newest_first<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> chrono::DateTime<Utc>,
{
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_admin(&self) -> StoreResult<Option<CredentialRecord>> {
        Ok(self.admin.lock().await.clone())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<CredentialRecord>> {
        let admin = self.admin.lock().await;
        Ok(admin.as_ref().filter(|record| record.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<CredentialRecord>> {
        let admin = self.admin.lock().await;
        Ok(admin.as_ref().filter(|record| record.id == id).cloned())
    }

    async fn create(&self, email: &str, password_hash: &str) -> StoreResult<CredentialRecord> {
        let mut admin = self.admin.lock().await;
        if admin.is_some() {
            return Err(StoreError::Conflict);
        }
        let now = Utc::now();
        let record = CredentialRecord {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            credential_version: 1,
            created_at: now,
            updated_at: now,
        };
        *admin = Some(record.clone());
        Ok(record)
    }

    async fn update_password_hash(
        &self,
        id: Uuid,
        expected_version: i64,
        password_hash: &str,
    ) -> StoreResult<()> {
        let mut admin = self.admin.lock().await;
        match admin.as_mut() {
            Some(record) if record.id == id && record.credential_version == expected_version => {
                record.password_hash = password_hash.to_string();
                record.credential_version += 1;
                record.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn list(&self) -> StoreResult<Vec<Project>> {
        let mut projects = self.projects.lock().await.clone();
        newest_first(&mut projects, |project| project.created_at);
        Ok(projects)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Project>> {
        let projects = self.projects.lock().await;
        Ok(projects.iter().find(|project| project.id == id).cloned())
    }

    async fn create(&self, input: ProjectInput) -> StoreResult<Project> {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            name: input.name,
            description: input.description,
            category: input.category,
            images: input.images,
            created_at: now,
            updated_at: now,
        };
        self.projects.lock().await.push(project.clone());
        Ok(project)
    }

    async fn update(&self, id: Uuid, input: ProjectInput) -> StoreResult<Project> {
        let mut projects = self.projects.lock().await;
        let project = projects
            .iter_mut()
            .find(|project| project.id == id)
            .ok_or(StoreError::NotFound)?;
        project.name = input.name;
        project.description = input.description;
        project.category = input.category;
        project.images = input.images;
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let mut projects = self.projects.lock().await;
        let before = projects.len();
        projects.retain(|project| project.id != id);
        if projects.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn list(&self) -> StoreResult<Vec<Campaign>> {
        let mut campaigns = self.campaigns.lock().await.clone();
        newest_first(&mut campaigns, |campaign| campaign.created_at);
        Ok(campaigns)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Campaign>> {
        let campaigns = self.campaigns.lock().await;
        Ok(campaigns.iter().find(|campaign| campaign.id == id).cloned())
    }

    async fn active(&self) -> StoreResult<Option<Campaign>> {
        let campaigns = self.campaigns.lock().await;
        Ok(campaigns.iter().find(|campaign| campaign.is_active).cloned())
    }

    async fn create(&self, input: CampaignInput) -> StoreResult<Campaign> {
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            title: input.title,
            message: input.message,
            image_url: input.image_url,
            is_active: false,
            created_at: now,
            updated_at: now,
        };
        self.campaigns.lock().await.push(campaign.clone());
        Ok(campaign)
    }

    async fn update(
        &self,
        id: Uuid,
        input: CampaignInput,
        is_active: bool,
    ) -> StoreResult<Campaign> {
        let mut campaigns = self.campaigns.lock().await;
        if !campaigns.iter().any(|campaign| campaign.id == id) {
            return Err(StoreError::NotFound);
        }
        let now = Utc::now();
        let mut updated = None;
        for campaign in campaigns.iter_mut() {
            if campaign.id == id {
                campaign.title = input.title.clone();
                campaign.message = input.message.clone();
                campaign.image_url = input.image_url.clone();
                campaign.is_active = is_active;
                campaign.updated_at = now;
                updated = Some(campaign.clone());
            } else if is_active && campaign.is_active {
                campaign.is_active = false;
                campaign.updated_at = now;
            }
        }
        updated.ok_or(StoreError::NotFound)
    }

    async fn activate(&self, id: Uuid) -> StoreResult<Campaign> {
        let mut campaigns = self.campaigns.lock().await;
        if !campaigns.iter().any(|campaign| campaign.id == id) {
            return Err(StoreError::NotFound);
        }
        let now = Utc::now();
        let mut activated = None;
        for campaign in campaigns.iter_mut() {
            let should_be_active = campaign.id == id;
            if campaign.is_active != should_be_active {
                campaign.is_active = should_be_active;
                campaign.updated_at = now;
            }
            if should_be_active {
                activated = Some(campaign.clone());
            }
        }
        activated.ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let mut campaigns = self.campaigns.lock().await;
        let before = campaigns.len();
        campaigns.retain(|campaign| campaign.id != id);
        if campaigns.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriberStore for MemoryStore {
    async fn subscribe(&self, email: &str) -> StoreResult<Subscriber> {
        let mut subscribers = self.subscribers.lock().await;
        if subscribers.iter().any(|subscriber| subscriber.email == email) {
            return Err(StoreError::Conflict);
        }
        let subscriber = Subscriber {
            id: Uuid::new_v4(),
            email: email.to_string(),
            subscribed_at: Utc::now(),
        };
        subscribers.push(subscriber.clone());
        Ok(subscriber)
    }

    async fn page(&self, offset: i64, limit: i64) -> StoreResult<SubscriberPage> {
        let mut subscribers = self.subscribers.lock().await.clone();
        let total = i64::try_from(subscribers.len()).unwrap_or(i64::MAX);
        newest_first(&mut subscribers, |subscriber| subscriber.subscribed_at);
        let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit.max(0)).unwrap_or(0);
        Ok(SubscriberPage {
            subscribers: subscribers.into_iter().skip(offset).take(limit).collect(),
            total,
        })
    }
}
