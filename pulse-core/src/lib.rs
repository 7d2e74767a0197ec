//! pulse-core: fundamental types, traits and the batch executor.
//!
//! Goal: provide the essential abstractions for a recoverable word count:
//! - `BatchTime`, `BatchInterval`, `WordCount`, `Checkpoint`
//! - Traits: `LineSource`, `BatchOperator`, `BatchSink`, `CheckpointStore`
//! - A tokio-based `Executor` that drives one batch per interval
//!
//! Quick example:
//! ```no_run
//! use pulse_core::{BatchOperator, BatchSink, BatchTime, Checkpoint, LineSource, WordCount};
//! # use pulse_core::config::{PipelineConfig, SourceConfig};
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! struct MySource;
//! #[async_trait::async_trait]
//! impl LineSource for MySource {
//!     async fn drain(&mut self) -> pulse_core::Result<Vec<String>> { Ok(vec!["hello".into()]) }
//! }
//!
//! struct MyOp(WordCount);
//! impl BatchOperator for MyOp {
//!     fn on_line(&mut self, line: &str) { self.0.add(line) }
//!     fn finish(&mut self) -> WordCount { std::mem::take(&mut self.0) }
//! }
//!
//! struct MySink;
//! #[async_trait::async_trait]
//! impl BatchSink for MySink {
//!     async fn append(&mut self, _t: BatchTime, _c: &WordCount) -> pulse_core::Result<()> { Ok(()) }
//! }
//!
//! # let config = PipelineConfig::new(SourceConfig::new("localhost", 9999), "/tmp/ckpt", "/tmp/out");
//! # let store = std::sync::Arc::new(NoStore);
//! # struct NoStore;
//! # #[async_trait::async_trait]
//! # impl pulse_core::CheckpointStore for NoStore {
//! #     async fn load(&self) -> pulse_core::Result<Option<Checkpoint>> { Ok(None) }
//! #     async fn save(&self, _c: &Checkpoint) -> pulse_core::Result<()> { Ok(()) }
//! # }
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! let mut exec = pulse_core::Executor::new(Checkpoint::fresh(config))?;
//! exec.source(MySource).operator(MyOp(WordCount::new())).sink(MySink).checkpoints(store);
//! exec.run(shutdown).await?;
//! # Ok(()) }
//! ```

use std::path::PathBuf;

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod executor;
pub mod metrics;
pub mod time;

pub use batch::{BatchInterval, BatchTime, WordCount};
pub use checkpoint::{Checkpoint, PendingBatch};
pub use executor::Executor;
pub use time::BatchClock;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad or missing arguments, or an unusable tuning file.
    #[error("configuration error: {0}")]
    Config(String),
    /// The line source could not be reached within the retry budget.
    #[error("could not connect to {addr} after {attempts} attempt(s): {source}")]
    Connection {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    /// A checkpoint exists but cannot be trusted. Never treated as "no checkpoint".
    #[error("checkpoint at {} is corrupt: {reason}", .path.display())]
    CheckpointCorrupt { path: PathBuf, reason: String },
    #[error("failed to write batch output to {}: {source}", .path.display())]
    SinkWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Produces the lines received since the previous drain.
#[async_trait::async_trait]
pub trait LineSource: Send {
    /// Takes every buffered line without waiting for more. Lines that arrive
    /// after this call belong to the next batch.
    async fn drain(&mut self) -> Result<Vec<String>>;
}

/// Folds the lines of one batch into a `WordCount`.
pub trait BatchOperator: Send {
    fn on_line(&mut self, line: &str);
    /// Emits the batch result and resets for the next batch.
    fn finish(&mut self) -> WordCount;
}

#[async_trait::async_trait]
pub trait BatchSink: Send {
    /// Durably records one batch. Must complete before the batch is committed.
    async fn append(&mut self, time: BatchTime, counts: &WordCount) -> Result<()>;
}

#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// `Ok(None)` only when no checkpoint was ever published.
    async fn load(&self) -> Result<Option<Checkpoint>>;
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
}

pub mod prelude {
    pub use super::{
        BatchInterval, BatchOperator, BatchSink, BatchTime, Checkpoint, CheckpointStore, Executor, LineSource,
        PendingBatch, Result, WordCount,
    };
}
