use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{
    metrics, BatchClock, BatchInterval, BatchOperator, BatchSink, BatchTime, Checkpoint, CheckpointStore, LineSource,
    PendingBatch, Result,
};

/// Drives the batch loop: one drain, count, sink append and commit per interval.
///
/// Batches are strictly sequential. Each batch is committed in two checkpoint
/// writes around the sink append:
/// 1. the closed batch is recorded as pending,
/// 2. the sink appends it,
/// 3. the batch is committed.
///
/// A crash between 2 and 3 replays the pending batch on recovery, so the sink
/// may see one batch twice but never loses a closed batch.
pub struct Executor {
    interval: BatchInterval,
    checkpoint: Checkpoint,
    source: Option<Box<dyn LineSource>>,
    operator: Option<Box<dyn BatchOperator>>,
    sink: Option<Box<dyn BatchSink>>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl Executor {
    /// Starts from `checkpoint`, either fresh or recovered. The batch
    /// interval comes from the checkpointed configuration.
    pub fn new(checkpoint: Checkpoint) -> Result<Self> {
        Ok(Self {
            interval: checkpoint.config.batch_interval()?,
            checkpoint,
            source: None,
            operator: None,
            sink: None,
            store: None,
        })
    }

    pub fn source<S: LineSource + 'static>(&mut self, s: S) -> &mut Self {
        self.source = Some(Box::new(s));
        self
    }

    pub fn operator<O: BatchOperator + 'static>(&mut self, o: O) -> &mut Self {
        self.operator = Some(Box::new(o));
        self
    }

    pub fn sink<K: BatchSink + 'static>(&mut self, s: K) -> &mut Self {
        self.sink = Some(Box::new(s));
        self
    }

    pub fn checkpoints<C: CheckpointStore + 'static>(&mut self, store: Arc<C>) -> &mut Self {
        self.store = Some(store);
        self
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Runs until `shutdown` turns true (or its sender is dropped). The batch in
    /// progress when shutdown is observed is still closed and committed, stamped
    /// with the time it was closed rather than its scheduled boundary.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut source = self.source.take().ok_or_else(|| anyhow::anyhow!("no source"))?;
        let mut operator = self.operator.take().ok_or_else(|| anyhow::anyhow!("no operator"))?;
        let mut sink = self.sink.take().ok_or_else(|| anyhow::anyhow!("no sink"))?;
        let store = self.store.take().ok_or_else(|| anyhow::anyhow!("no checkpoint store"))?;

        if let Some(pending) = self.checkpoint.pending.clone() {
            info!(batch_time = %pending.time, "replaying batch that was not committed before restart");
            sink.append(pending.time, &pending.counts).await?;
            self.commit(store.as_ref(), pending.time).await?;
            metrics::BATCHES.with_label_values(&["replayed"]).inc();
        }

        let mut clock = BatchClock::new(self.interval, self.checkpoint.last_committed);
        info!(
            interval_ms = self.interval.as_millis(),
            resumed_after = ?self.checkpoint.last_committed,
            "batch loop started"
        );
        loop {
            let scheduled = clock.next_after(Utc::now());
            let stopping = wait_for_boundary(scheduled, &mut shutdown).await;
            let batch_time = if stopping {
                close_time(scheduled, self.checkpoint.last_committed, Utc::now())
            } else {
                scheduled
            };

            let started = Instant::now();
            let lines = source.drain().await?;
            for line in &lines {
                operator.on_line(line);
            }
            let counts = operator.finish();
            debug!(batch_time = %batch_time, lines = lines.len(), words = counts.total(), "batch closed");

            self.checkpoint.record_pending(PendingBatch {
                time: batch_time,
                counts: counts.clone(),
            });
            save(&self.checkpoint, store.as_ref(), "pending").await?;
            sink.append(batch_time, &counts).await?;
            self.commit(store.as_ref(), batch_time).await?;

            metrics::BATCHES.with_label_values(&["committed"]).inc();
            metrics::BATCH_LATENCY_MS.observe(started.elapsed().as_secs_f64() * 1_000.0);

            if stopping || *shutdown.borrow() {
                info!(
                    batches_committed = self.checkpoint.batches_committed,
                    "shutdown requested, batch loop stopped"
                );
                return Ok(());
            }
        }
    }

    async fn commit(&mut self, store: &dyn CheckpointStore, time: BatchTime) -> Result<()> {
        self.checkpoint.commit(time);
        save(&self.checkpoint, store, "commit").await?;
        metrics::LAST_COMMITTED_BATCH_MS.set(time.millis());
        Ok(())
    }

}

// Borrows only the checkpoint (not the whole executor) so the run future stays Send.
async fn save(checkpoint: &Checkpoint, store: &dyn CheckpointStore, kind: &str) -> Result<()> {
    store.save(checkpoint).await?;
    metrics::CHECKPOINT_WRITES.with_label_values(&[kind]).inc();
    Ok(())
}

/// Stamp for a batch cut short by shutdown: the time it was closed, kept
/// after the last commit and no later than its scheduled boundary.
fn close_time(scheduled: BatchTime, last_committed: Option<BatchTime>, now: DateTime<Utc>) -> BatchTime {
    let floor = last_committed.map_or(i64::MIN, |t| t.millis().saturating_add(1));
    BatchTime::from_datetime(now).max(BatchTime(floor)).min(scheduled)
}

/// Sleeps until the wall clock reaches `boundary`. Returns true when shutdown
/// was requested first.
async fn wait_for_boundary(boundary: BatchTime, shutdown: &mut watch::Receiver<bool>) -> bool {
    let wait_ms = boundary.millis().saturating_sub(Utc::now().timestamp_millis()).max(0) as u64;
    let sleep = tokio::time::sleep(Duration::from_millis(wait_ms));
    tokio::pin!(sleep);
    loop {
        if *shutdown.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return true;
                }
            }
        }
    }
}
