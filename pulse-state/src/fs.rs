use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pulse_core::{Checkpoint, CheckpointStore, Error, Result};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const CHECKPOINT_FILE: &str = "checkpoint.json";
const TEMP_FILE: &str = "checkpoint.json.tmp";

/// Publishes checkpoints into a directory with write-to-temp-then-rename, so a
/// reader sees either the previous checkpoint or the new one, never a torn write.
///
/// Layout:
/// - `checkpoint.json`: the published checkpoint
/// - `checkpoint.json.tmp`: in-flight write; ignored by `load`
#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
    dir: PathBuf,
    checkpoint_path: PathBuf,
    temp_path: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            checkpoint_path: dir.join(CHECKPOINT_FILE),
            temp_path: dir.join(TEMP_FILE),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the published checkpoint file.
    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    async fn publish(&self, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut tmp = tokio::fs::File::create(&self.temp_path).await?;
        tmp.write_all(bytes).await?;
        tmp.sync_all().await?;
        drop(tmp);

        tokio::fs::rename(&self.temp_path, &self.checkpoint_path).await?;
        sync_dir(&self.dir).await
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        let bytes = match tokio::fs::read(&self.checkpoint_path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::CheckpointCorrupt {
                    path: self.checkpoint_path.clone(),
                    reason: format!("cannot read: {e}"),
                })
            }
        };
        let cp = Checkpoint::decode(&bytes, &self.checkpoint_path)?;
        debug!(path = %self.checkpoint_path.display(), last_committed = ?cp.last_committed, "checkpoint loaded");
        Ok(Some(cp))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = checkpoint.encode()?;
        self.publish(&bytes).await?;
        debug!(
            path = %self.checkpoint_path.display(),
            last_committed = ?checkpoint.last_committed,
            pending = checkpoint.pending.is_some(),
            "checkpoint saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::config::{PipelineConfig, SourceConfig};
    use pulse_core::{BatchTime, PendingBatch};

    fn checkpoint(dir: &Path) -> Checkpoint {
        let config = PipelineConfig::new(SourceConfig::new("localhost", 9999), dir, "/tmp/pulse-out.txt");
        let mut cp = Checkpoint::fresh(config);
        cp.commit(BatchTime(1_700_000_000_000));
        cp.record_pending(PendingBatch {
            time: BatchTime(1_700_000_001_000),
            counts: [("a", 3)].into_iter().collect(),
        });
        cp
    }

    #[tokio::test]
    async fn missing_directory_is_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(tmp.path().join("never-created"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_creates_directory_and_roundtrips() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("ckpt");
        let store = FsCheckpointStore::new(&dir);
        let cp = checkpoint(&dir);
        store.save(&cp).await.unwrap();

        assert!(store.checkpoint_path().exists());
        assert!(!dir.join(TEMP_FILE).exists());
        assert_eq!(store.load().await.unwrap(), Some(cp));
    }

    #[tokio::test]
    async fn save_replaces_previous_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(tmp.path());
        let mut cp = checkpoint(tmp.path());
        store.save(&cp).await.unwrap();
        cp.commit(BatchTime(1_700_000_001_000));
        store.save(&cp).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.batches_committed, 2);
        assert!(loaded.pending.is_none());
    }

    #[tokio::test]
    async fn stale_temp_file_is_not_a_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(tmp.path());
        // a crash mid-write leaves only the temp file behind
        tokio::fs::write(tmp.path().join(TEMP_FILE), b"{\"version\":1,\"chec").await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        // and it does not get in the way of the next save
        let cp = checkpoint(tmp.path());
        store.save(&cp).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(cp));
    }

    #[tokio::test]
    async fn corrupt_checkpoint_is_distinct_from_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(tmp.path());
        tokio::fs::write(store.checkpoint_path(), b"\x00\x01garbage").await.unwrap();
        match store.load().await {
            Err(Error::CheckpointCorrupt { path, .. }) => assert_eq!(path, store.checkpoint_path()),
            other => panic!("expected CheckpointCorrupt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreadable_checkpoint_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(tmp.path());
        // a directory where the file should be cannot be read as a checkpoint
        tokio::fs::create_dir(store.checkpoint_path()).await.unwrap();
        assert!(matches!(store.load().await, Err(Error::CheckpointCorrupt { .. })));
    }
}
