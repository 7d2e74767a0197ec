use chrono::{DateTime, Utc};

use crate::{BatchInterval, BatchTime};

/// Hands out batch boundaries aligned to multiples of the interval.
///
/// Boundaries never repeat and never go backwards, including across a restart
/// seeded with the last committed batch.
#[derive(Debug, Clone)]
pub struct BatchClock {
    interval: BatchInterval,
    last: Option<BatchTime>,
}

impl BatchClock {
    pub fn new(interval: BatchInterval, last_committed: Option<BatchTime>) -> Self {
        Self {
            interval,
            last: last_committed,
        }
    }

    /// The first aligned boundary strictly after `now` that is also strictly
    /// after the previously issued (or recovered) batch time.
    pub fn next_after(&mut self, now: DateTime<Utc>) -> BatchTime {
        let size = self.interval.as_millis();
        let mut next = boundary_after(now.timestamp_millis(), size);
        if let Some(last) = self.last {
            if next <= last.millis() {
                next = boundary_after(last.millis(), size);
            }
        }
        self.last = Some(BatchTime(next));
        BatchTime(next)
    }

    pub fn last(&self) -> Option<BatchTime> {
        self.last
    }
}

fn boundary_after(ms: i64, size: i64) -> i64 {
    ms.div_euclid(size).saturating_mul(size).saturating_add(size)
}
