//! Image storage for project and campaign uploads.
//!
//! Blobs are addressed by an opaque `blob_id` and exposed through a public URL.
//! The filesystem backend writes under a root directory that the HTTP server
//! also serves at `/uploads`.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, warn};
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob id: {0}")]
    InvalidId(String),
    #[error("blob storage io error")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub blob_id: String,
    pub url: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `data` and return its id and public URL.
    async fn put(&self, file_name: &str, data: Bytes) -> Result<StoredBlob, BlobError>;

    /// Remove a blob. Missing blobs are not an error.
    async fn delete(&self, blob_id: &str) -> Result<(), BlobError>;
}

/// Keep an extension from the client file name when it is short and plain.
fn extension_of(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn new_blob_id(file_name: &str) -> String {
    let id = Ulid::new().to_string().to_lowercase();
    match extension_of(file_name) {
        Some(ext) => format!("{id}.{ext}"),
        None => id,
    }
}

/// The blob id is the last path segment of its public URL.
#[must_use]
pub fn blob_id_from_url(url: &str) -> Option<&str> {
    let id = url.rsplit('/').next()?;
    validate_blob_id(id).ok().map(|()| id)
}

fn validate_blob_id(blob_id: &str) -> Result<(), BlobError> {
    let valid = !blob_id.is_empty()
        && !blob_id.starts_with('.')
        && blob_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidId(blob_id.to_string()))
    }
}

/// Where uploads are written and the URL prefix they are served under.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    upload_dir: PathBuf,
    public_url: String,
}

impl StorageConfig {
    #[must_use]
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            public_url: "/uploads".to_string(),
        }
    }

    #[must_use]
    pub fn with_public_url(mut self, public_url: String) -> Self {
        self.public_url = public_url;
        self
    }

    #[must_use]
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.public_url
    }
}

/// Filesystem backend.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    /// `public_base_url` is the prefix under which `root` is served, for
    /// example `https://admin.example.com/uploads`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, blob_id: &str) -> Result<PathBuf, BlobError> {
        validate_blob_id(blob_id)?;
        Ok(self.root.join(blob_id))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, file_name: &str, data: Bytes) -> Result<StoredBlob, BlobError> {
        fs::create_dir_all(&self.root).await?;

        let blob_id = new_blob_id(file_name);
        let path = self.path_for(&blob_id)?;
        let tmp_path = self.root.join(format!(".{blob_id}.tmp"));

        write_atomically(&tmp_path, &path, &data).await?;

        debug!(blob_id = %blob_id, size = data.len(), "stored blob");

        Ok(StoredBlob {
            url: format!("{}/{blob_id}", self.public_base_url),
            blob_id,
        })
    }

    async fn delete(&self, blob_id: &str) -> Result<(), BlobError> {
        let path = self.path_for(blob_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(blob_id = %blob_id, "blob already removed");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Write to `tmp_path` then rename onto `path` so readers never see a
/// partial file. The temporary file is removed when any step fails.
async fn write_atomically(tmp_path: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let result = async {
        let mut file = fs::File::create(tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(tmp_path, path).await
    }
    .await;

    if let Err(err) = &result {
        warn!(path = %tmp_path.display(), "blob write failed: {err}");
        match fs::remove_file(tmp_path).await {
            Err(cleanup) if cleanup.kind() != std::io::ErrorKind::NotFound => {
                warn!(path = %tmp_path.display(), "failed to remove temporary blob: {cleanup}");
            }
            _ => {}
        }
    }
    result
}

/// In-process backend for tests and `memory://` deployments.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub async fn contains(&self, blob_id: &str) -> bool {
        self.blobs.lock().await.contains_key(blob_id)
    }

    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, file_name: &str, data: Bytes) -> Result<StoredBlob, BlobError> {
        let blob_id = new_blob_id(file_name);
        self.blobs.lock().await.insert(blob_id.clone(), data);
        Ok(StoredBlob {
            url: format!("memory://{blob_id}"),
            blob_id,
        })
    }

    async fn delete(&self, blob_id: &str) -> Result<(), BlobError> {
        self.blobs.lock().await.remove(blob_id);
        Ok(())
    }
}
