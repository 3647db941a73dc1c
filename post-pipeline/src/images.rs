use crate::types::{JobId, StoreError, VariantId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Binary storage for generated images. Jobs only hold the returned reference.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Stores `bytes` under a reference that has never been handed out before.
    /// The reference's extension follows `mime_type`.
    async fn put(
        &self,
        job_id: JobId,
        variant: VariantId,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, StoreError>;

    async fn get(&self, reference: &str) -> Result<Vec<u8>, StoreError>;
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

fn new_reference(job_id: JobId, variant: VariantId, mime_type: &str) -> String {
    format!(
        "{}/images/{}-{}.{}",
        job_id,
        variant,
        Uuid::new_v4().simple(),
        extension_for(mime_type)
    )
}

pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves a reference under the root, refusing anything that would
    /// escape it.
    fn resolve(&self, reference: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if reference.is_empty() || escapes {
            return Err(StoreError::ImageNotFound {
                reference: reference.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn put(
        &self,
        job_id: JobId,
        variant: VariantId,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, StoreError> {
        let reference = new_reference(job_id, variant, mime_type);
        let path = self.resolve(&reference)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(reference)
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(reference)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::ImageNotFound {
                reference: reference.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct MemoryImageStore {
    images: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self {
            images: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.images.read().await.len()
    }
}

impl Default for MemoryImageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn put(
        &self,
        job_id: JobId,
        variant: VariantId,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, StoreError> {
        let reference = new_reference(job_id, variant, mime_type);
        self.images.write().await.insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }

    async fn get(&self, reference: &str) -> Result<Vec<u8>, StoreError> {
        self.images
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::ImageNotFound {
                reference: reference.to_string(),
            })
    }
}
