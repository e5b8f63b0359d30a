use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use contrack_core::Contest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Last successfully reconciled contest set, served when the store is unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestSnapshot {
    pub run_id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub contests: Vec<Contest>,
}

#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub path: PathBuf,
    pub content_hash: String,
    /// True when the contest set matched what was already on disk and nothing was rewritten.
    pub unchanged: bool,
}

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contests_hash(contests: &[Contest]) -> anyhow::Result<String> {
        let bytes = serde_json::to_vec(contests).context("serializing contests for hashing")?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    pub async fn load(&self) -> anyhow::Result<Option<ContestSnapshot>> {
        if !fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking snapshot {}", self.path.display()))?
        {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)
            .await
            .with_context(|| format!("reading snapshot {}", self.path.display()))?;
        let snapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing snapshot {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    /// Replaces the snapshot through a temp file and rename so readers never see a torn file.
    pub async fn save(&self, snapshot: &ContestSnapshot) -> anyhow::Result<SavedSnapshot> {
        let content_hash = Self::contests_hash(&snapshot.contests)?;
        if let Ok(Some(existing)) = self.load().await {
            if Self::contests_hash(&existing.contests)? == content_hash {
                return Ok(SavedSnapshot {
                    path: self.path.clone(),
                    content_hash,
                    unchanged: true,
                });
            }
        }

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating snapshot directory {}", parent.display()))?;

        let bytes = serde_json::to_vec_pretty(snapshot).context("serializing snapshot")?;
        let temp_path = parent.join(format!(".snapshot.{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp snapshot {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp snapshot {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp snapshot {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp snapshot {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }

        Ok(SavedSnapshot {
            path: self.path.clone(),
            content_hash,
            unchanged: false,
        })
    }
}
