//! pulse-ops: operators that turn raw lines into per-batch word counts.
//!
//! Included:
//! - `tokenize`: splits a line on runs of whitespace
//! - `WordCounter`: a `BatchOperator` that counts words within one batch and
//!   starts from scratch for the next one

use pulse_core::{BatchOperator, WordCount};
use tracing::instrument;

/// Splits `line` on runs of Unicode whitespace. Empty tokens never appear.
///
/// ```
/// let words: Vec<_> = pulse_ops::tokenize("  the\tcat  sat ").collect();
/// assert_eq!(words, ["the", "cat", "sat"]);
/// ```
pub fn tokenize(line: &str) -> impl Iterator<Item = &str> {
    line.split_whitespace()
}

/// Counts word occurrences for the current batch.
///
/// Counts are never cumulative: `finish` hands out the batch result and the
/// next batch starts empty.
///
/// Example
/// ```
/// use pulse_core::BatchOperator;
/// let mut counter = pulse_ops::WordCounter::new();
/// counter.on_line("the cat sat");
/// counter.on_line("the dog ran");
/// let counts = counter.finish();
/// assert_eq!(counts.get("the"), 2);
/// assert!(counter.finish().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct WordCounter {
    current: WordCount,
    lines: u64,
}

impl WordCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines folded into the batch in progress.
    pub fn lines_in_batch(&self) -> u64 {
        self.lines
    }
}

impl BatchOperator for WordCounter {
    fn on_line(&mut self, line: &str) {
        let mut n = 0;
        for word in tokenize(line) {
            self.current.add(word);
            n += 1;
        }
        self.lines += 1;
        pulse_core::metrics::WORDS_COUNTED.inc_by(n);
    }

    #[instrument(name = "word_counter_finish", skip_all, fields(lines = self.lines))]
    fn finish(&mut self) -> WordCount {
        self.lines = 0;
        std::mem::take(&mut self.current)
    }
}
