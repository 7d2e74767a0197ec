use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::{Checkpoint, CheckpointStore, Error, Result};

#[derive(Default)]
struct Inner {
    published: Option<Vec<u8>>,
    saves: u64,
    attempts: u64,
    fail_on_attempt: Option<u64>,
}

#[derive(Clone)]
/// A `CheckpointStore` that keeps the encoded checkpoint in memory.
///
/// Goes through the same encode/decode path as the filesystem store, so a
/// checkpoint that loads here loads from disk too.
pub struct InMemoryCheckpointStore(Arc<Mutex<Inner>>);

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Inner::default())))
    }
}

impl InMemoryCheckpointStore {
    /// Number of successful saves so far.
    pub fn saves(&self) -> u64 {
        self.0.lock().saves
    }

    /// Replaces the stored bytes, e.g. to simulate on-disk corruption.
    pub fn overwrite_raw(&self, bytes: Vec<u8>) {
        self.0.lock().published = Some(bytes);
    }

    /// Makes save attempt number `n` (1-based, counted across clones) fail
    /// without touching the stored checkpoint, as if the process died there.
    pub fn fail_on_save(&self, n: u64) {
        self.0.lock().fail_on_attempt = Some(n);
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self) -> Result<Option<Checkpoint>> {
        match self.0.lock().published.as_deref() {
            Some(bytes) => Ok(Some(Checkpoint::decode(bytes, Path::new("memory"))?)),
            None => Ok(None),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = checkpoint.encode()?;
        let mut guard = self.0.lock();
        guard.attempts += 1;
        if guard.fail_on_attempt == Some(guard.attempts) {
            return Err(Error::Io(std::io::Error::other(format!(
                "checkpoint save #{} failed",
                guard.attempts
            ))));
        }
        guard.published = Some(bytes);
        guard.saves += 1;
        Ok(())
    }
}
