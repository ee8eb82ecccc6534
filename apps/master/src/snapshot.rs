use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use common::{ChunkRecord, FileRecord, NodeDescriptor};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to rebuild registry and metadata after a restart.
/// Pending instructions are not persisted; the first sweep recomputes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MasterSnapshot {
    pub version: u32,
    pub saved_at_unix: u64,
    pub nodes: Vec<NodeDescriptor>,
    pub files: Vec<FileRecord>,
    pub chunks: Vec<ChunkRecord>,
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub async fn init(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let parent = path
            .parent()
            .with_context(|| format!("snapshot path has no parent: {}", path.display()))?;
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<MasterSnapshot>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }

        let payload = fs::read(&self.path).await?;
        let snapshot = serde_json::from_slice::<MasterSnapshot>(&payload)
            .with_context(|| format!("invalid master snapshot: {}", self.path.display()))?;

        if snapshot.version != SNAPSHOT_VERSION {
            bail!(
                "unsupported snapshot version {} in {}",
                snapshot.version,
                self.path.display()
            );
        }

        Ok(Some(snapshot))
    }

    pub async fn save(&self, snapshot: &MasterSnapshot) -> Result<()> {
        let payload = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &payload).await
    }
}

async fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent).await?;

    let tmp = path.with_extension(format!(
        "tmp-{}-{}",
        std::process::id(),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    ));

    fs::write(&tmp, payload).await?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to move {} -> {}", tmp.display(), path.display()))?;

    Ok(())
}
