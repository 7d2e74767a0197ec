//! Startup decision (resume or fresh) and wiring of the word count pipeline.

use std::sync::Arc;

use pulse_core::config::{PipelineConfig, TuningConfig};
use pulse_core::{Checkpoint, CheckpointStore, Executor, Result};
use pulse_io::{FileSink, RetryPolicy, SocketLineSource};
use pulse_ops::WordCounter;
use pulse_state::FsCheckpointStore;
use tokio::sync::watch;
use tracing::{info, warn};

/// Outcome of the startup decision.
pub struct Prepared {
    pub checkpoint: Checkpoint,
    pub store: Arc<FsCheckpointStore>,
    pub recovered: bool,
}

/// Loads the checkpoint in `requested.checkpoint_dir`, or sets up a fresh run.
///
/// Recovered runs keep the checkpointed source, output and interval and leave
/// the output file alone. Fresh runs delete the output file and publish an
/// initial checkpoint. A corrupt checkpoint is an error, never a fresh start.
pub async fn prepare(requested: PipelineConfig) -> Result<Prepared> {
    let store = Arc::new(FsCheckpointStore::new(&requested.checkpoint_dir));
    match store.load().await? {
        Some(mut checkpoint) => {
            info!(
                path = %store.checkpoint_path().display(),
                last_committed = ?checkpoint.last_committed,
                batches_committed = checkpoint.batches_committed,
                pending = checkpoint.pending.is_some(),
                "recovering from checkpoint"
            );
            if checkpoint.config.checkpoint_dir != requested.checkpoint_dir {
                warn!(
                    recorded = %checkpoint.config.checkpoint_dir.display(),
                    "checkpoint directory was moved, continuing from its new location"
                );
                checkpoint.config.checkpoint_dir = requested.checkpoint_dir.clone();
            }
            if checkpoint.config != requested {
                warn!(
                    recovered = ?checkpoint.config,
                    requested = ?requested,
                    "ignoring new settings, the checkpointed configuration wins"
                );
            }
            Ok(Prepared {
                checkpoint,
                store,
                recovered: true,
            })
        }
        None => {
            info!(path = %store.dir().display(), "no checkpoint found, creating new context");
            FileSink::truncate(&requested.output_path).await?;
            let checkpoint = Checkpoint::fresh(requested);
            store.save(&checkpoint).await?;
            pulse_core::metrics::CHECKPOINT_WRITES.with_label_values(&["initial"]).inc();
            Ok(Prepared {
                checkpoint,
                store,
                recovered: false,
            })
        }
    }
}

/// Runs the pipeline until `shutdown` turns true.
pub async fn run(requested: PipelineConfig, tuning: TuningConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let Prepared { checkpoint, store, .. } = prepare(requested).await?;
    let policy = RetryPolicy::from_config(&tuning.connect)?;
    let source = SocketLineSource::connect(checkpoint.config.source.addr(), policy).await?;
    let sink = FileSink::new(&checkpoint.config.output_path);

    let mut exec = Executor::new(checkpoint)?;
    exec.source(source)
        .operator(WordCounter::new())
        .sink(sink)
        .checkpoints(store);
    exec.run(shutdown).await
}
