//! Profile-picture blob storage.
//!
//! `BlobStore` is the capability the importer writes pictures through.
//! `FsBlobStore` keeps them in the media directory, `MemoryBlobStore` keeps
//! them in a map for tests and dry runs.
//!
//! The trait is object-safe so callers can hold `Arc<dyn BlobStore>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

// =============================================================================
// Core trait
// =============================================================================

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `name` and return the handle to reference it by.
    /// Saving the same name again overwrites it.
    async fn save(&self, name: &str, data: &[u8]) -> Result<String>;

    /// Remove a blob. Deleting a missing handle is not an error.
    async fn delete(&self, handle: &str) -> Result<()>;

    async fn contains(&self, handle: &str) -> Result<bool>;
}

/// Handles are flat file names.
fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        bail!("Invalid blob name: {:?}", name);
    }
    Ok(())
}

// =============================================================================
// FsBlobStore: files under the media directory
// =============================================================================

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create the store, making sure the directory exists.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create media directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, handle: &str) -> Result<PathBuf> {
        check_name(handle)?;
        Ok(self.root.join(handle))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn save(&self, name: &str, data: &[u8]) -> Result<String> {
        let path = self.path(name)?;
        let tmp = self.root.join(format!(".{}.tmp", name));
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("Failed to write blob {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move blob into {}", path.display()))?;
        debug!(handle = %name, bytes = data.len(), "Blob saved");
        Ok(name.to_string())
    }

    async fn delete(&self, handle: &str) -> Result<()> {
        let path = self.path(handle)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(handle = %handle, "Blob deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete blob {}", path.display())),
        }
    }

    async fn contains(&self, handle: &str) -> Result<bool> {
        let path = self.path(handle)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

// =============================================================================
// MemoryBlobStore: map in memory (tests, dry runs)
// =============================================================================

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn handles(&self) -> Vec<String> {
        self.blobs.lock().keys().cloned().collect()
    }

    #[cfg(test)]
    pub fn get(&self, handle: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(handle).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save(&self, name: &str, data: &[u8]) -> Result<String> {
        check_name(name)?;
        self.blobs.lock().insert(name.to_string(), data.to_vec());
        Ok(name.to_string())
    }

    async fn delete(&self, handle: &str) -> Result<()> {
        self.blobs.lock().remove(handle);
        Ok(())
    }

    async fn contains(&self, handle: &str) -> Result<bool> {
        Ok(self.blobs.lock().contains_key(handle))
    }
}

// =============================================================================
// Tests
// =============================================================================
