use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::{BatchTime, Error, Result, WordCount};

/// Bumped whenever the on-disk layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

/// A closed batch whose output has not been committed yet.
/// Replayed into the sink on recovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingBatch {
    pub time: BatchTime,
    pub counts: WordCount,
}

/// Everything needed to resume processing after restart: the pipeline
/// configuration and the position of the batch loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub config: PipelineConfig,
    /// Last batch whose sink write and commit both completed.
    pub last_committed: Option<BatchTime>,
    pub batches_committed: u64,
    pub pending: Option<PendingBatch>,
    pub written_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    checksum: u64,
    checkpoint: &'a Checkpoint,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    checksum: u64,
    checkpoint: Checkpoint,
}

impl Checkpoint {
    pub fn fresh(config: PipelineConfig) -> Self {
        Self {
            config,
            last_committed: None,
            batches_committed: 0,
            pending: None,
            written_at: Utc::now(),
        }
    }

    pub fn record_pending(&mut self, batch: PendingBatch) {
        self.pending = Some(batch);
        self.written_at = Utc::now();
    }

    pub fn commit(&mut self, time: BatchTime) {
        self.last_committed = Some(time);
        self.batches_committed += 1;
        self.pending = None;
        self.written_at = Utc::now();
    }

    /// Semantic checks on top of what deserialization guarantees.
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.config.validate().map_err(|e| e.to_string())?;
        if self.last_committed.is_none() && self.batches_committed != 0 {
            return Err(format!("{} committed batches but no last commit time", self.batches_committed));
        }
        if let (Some(p), Some(last)) = (&self.pending, self.last_committed) {
            if p.time <= last {
                return Err(format!("pending batch {} is not after last commit {}", p.time, last));
            }
        }
        Ok(())
    }

    /// Serializes into a versioned, checksummed JSON document.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(self)?;
        let env = EnvelopeRef {
            version: FORMAT_VERSION,
            checksum: seahash::hash(&body),
            checkpoint: self,
        };
        Ok(serde_json::to_vec_pretty(&env)?)
    }

    /// Parses and verifies bytes read from `origin`. Any failure is reported
    /// as `CheckpointCorrupt`.
    pub fn decode(bytes: &[u8], origin: &Path) -> Result<Self> {
        let corrupt = |reason: String| Error::CheckpointCorrupt {
            path: origin.to_path_buf(),
            reason,
        };
        let env: Envelope = serde_json::from_slice(bytes).map_err(|e| corrupt(format!("unreadable: {e}")))?;
        if env.version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {} (expected {})",
                env.version, FORMAT_VERSION
            )));
        }
        let body = serde_json::to_vec(&env.checkpoint)?;
        let actual = seahash::hash(&body);
        if actual != env.checksum {
            return Err(corrupt(format!("checksum mismatch: stored {:#x}, computed {:#x}", env.checksum, actual)));
        }
        env.checkpoint.validate().map_err(corrupt)?;
        Ok(env.checkpoint)
    }
}
