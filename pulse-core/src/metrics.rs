use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static LINES_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("pulse_lines_received_total", "Lines read from the socket source").unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

pub static WORDS_COUNTED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("pulse_words_counted_total", "Tokens folded into batch word counts").unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

pub static BATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("pulse_batches_total", "Batches handed to the sink"),
        &["outcome"], // committed | replayed
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

pub static CHECKPOINT_WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("pulse_checkpoint_writes_total", "Checkpoints published"),
        &["kind"], // initial | pending | commit
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

pub static BYTES_WRITTEN: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("pulse_bytes_written_total", "Total bytes written by sink"),
        &["sink"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

pub static SOURCE_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("pulse_source_reconnects_total", "Times the socket source had to reconnect").unwrap();
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

pub static LAST_COMMITTED_BATCH_MS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("pulse_last_committed_batch_ms", "Batch time of the last committed batch").unwrap();
    REGISTRY.register(Box::new(g.clone())).unwrap();
    g
});

pub static BATCH_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    let h = Histogram::with_opts(
        HistogramOpts::new(
            "pulse_batch_process_latency_ms",
            "Time from batch close to commit (ms)",
        )
        .buckets(vec![
            0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0,
        ]),
    )
    .unwrap();
    REGISTRY.register(Box::new(h.clone())).unwrap();
    h
});

pub fn render_prometheus() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer).ok();
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_touched_metrics() {
        BATCHES.with_label_values(&["committed"]).inc();
        LINES_RECEIVED.inc_by(3);
        let text = render_prometheus();
        assert!(text.contains("pulse_batches_total"));
        assert!(text.contains("pulse_lines_received_total"));
    }
}
