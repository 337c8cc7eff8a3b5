//! On-disk staging of validated imports between validation and confirmation.
//!
//! Layout: `<root>/<owner>/<staging_id>.json` holds the staged rows,
//! `<staging_id>.zip` the original picture archive. The JSON file is written
//! last, so its presence marks a complete entry.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::ImportError;
use crate::types::ValidatedRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedImport {
    pub id: Uuid,
    pub owner: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub filename: Option<String>,
    pub rows: Vec<ValidatedRow>,
    pub has_archive: bool,
}

#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    ttl: Duration,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn owner_dir(&self, owner: Uuid) -> PathBuf {
        self.root.join(owner.to_string())
    }

    fn rows_path(&self, owner: Uuid, id: Uuid) -> PathBuf {
        self.owner_dir(owner).join(format!("{id}.json"))
    }

    fn archive_path(&self, owner: Uuid, id: Uuid) -> PathBuf {
        self.owner_dir(owner).join(format!("{id}.zip"))
    }

    /// Persist validated rows and the archive under a new staging id.
    pub async fn stage(
        &self,
        owner: Uuid,
        filename: Option<String>,
        rows: Vec<ValidatedRow>,
        archive: Option<&[u8]>,
    ) -> Result<StagedImport, ImportError> {
        let staged = StagedImport {
            id: Uuid::new_v4(),
            owner,
            created_at: Utc::now(),
            filename,
            rows,
            has_archive: archive.is_some(),
        };

        fs::create_dir_all(self.owner_dir(owner)).await?;
        if let Some(bytes) = archive {
            write_atomic(&self.archive_path(owner, staged.id), bytes).await?;
        }
        let json = serde_json::to_vec(&staged)?;
        write_atomic(&self.rows_path(owner, staged.id), &json).await?;

        debug!(staging_id = %staged.id, %owner, rows = staged.rows.len(), "Import staged");
        Ok(staged)
    }

    /// Load a staged import and its archive bytes. Expired entries count as
    /// missing.
    pub async fn load(&self, owner: Uuid, id: Uuid) -> Result<(StagedImport, Option<Vec<u8>>), ImportError> {
        let json = match fs::read(self.rows_path(owner, id)).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ImportError::StagingNotFound(id))
            }
            Err(e) => return Err(e.into()),
        };
        let staged: StagedImport = serde_json::from_slice(&json)?;

        if self.is_expired(&staged, Utc::now()) {
            self.remove(owner, id).await?;
            return Err(ImportError::StagingNotFound(id));
        }

        let archive = if staged.has_archive {
            Some(fs::read(self.archive_path(owner, id)).await?)
        } else {
            None
        };
        Ok((staged, archive))
    }

    /// Delete a staged import. Returns whether it existed.
    pub async fn remove(&self, owner: Uuid, id: Uuid) -> Result<bool, ImportError> {
        let existed = remove_if_exists(&self.rows_path(owner, id)).await?;
        remove_if_exists(&self.archive_path(owner, id)).await?;
        Ok(existed)
    }

    fn is_expired(&self, staged: &StagedImport, now: DateTime<Utc>) -> bool {
        staged.created_at + self.ttl < now
    }

    /// Remove every entry that outlived the TTL.
    pub async fn purge_expired(&self) -> Result<usize, ImportError> {
        self.purge_older_than(Utc::now() - self.ttl).await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, ImportError> {
        let mut owners = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut purged = 0;
        while let Some(owner_dir) = owners.next_entry().await? {
            if !owner_dir.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(owner_dir.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let expired = match fs::read(&path).await {
                    Ok(json) => match serde_json::from_slice::<StagedImport>(&json) {
                        Ok(staged) => staged.created_at < cutoff,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Removing unreadable staging entry");
                            true
                        }
                    },
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to read staging entry");
                        false
                    }
                };
                if expired {
                    remove_if_exists(&path).await?;
                    remove_if_exists(&path.with_extension("zip")).await?;
                    purged += 1;
                }
            }
        }

        if purged > 0 {
            info!(purged, "Purged expired staging entries");
        }
        Ok(purged)
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await
}

async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
