use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::parse_duration_ms;
use crate::{Error, Result};

/// End boundary of a batch, in epoch milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct BatchTime(pub i64);

impl BatchTime {
    pub fn from_datetime(t: DateTime<Utc>) -> Self {
        BatchTime(t.timestamp_millis())
    }

    pub fn millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for BatchTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ms", self.0)
    }
}

/// Width of every batch window. Positive, fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchInterval(i64);

impl BatchInterval {
    /// One week.
    pub const MAX_MILLIS: i64 = 7 * 24 * 3_600_000;

    pub fn from_millis(ms: i64) -> Result<Self> {
        if ms <= 0 {
            return Err(Error::Config(format!("batch interval must be positive, got {ms}ms")));
        }
        if ms > Self::MAX_MILLIS {
            return Err(Error::Config(format!(
                "batch interval must not exceed {}ms, got {ms}ms",
                Self::MAX_MILLIS
            )));
        }
        Ok(Self(ms))
    }

    /// Parses values such as `"1s"` or `"500ms"`.
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_millis(parse_duration_ms(s)?)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.0 as u64)
    }
}

impl Default for BatchInterval {
    fn default() -> Self {
        Self(1_000)
    }
}

/// Occurrences of each word within a single batch.
///
/// Ordered by word so rendering and checkpoint encoding are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WordCount(BTreeMap<String, u64>);

impl WordCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, word: &str) {
        self.add_n(word, 1);
    }

    pub fn add_n(&mut self, word: &str, n: u64) {
        match self.0.get_mut(word) {
            Some(c) => *c += n,
            None => {
                self.0.insert(word.to_owned(), n);
            }
        }
    }

    pub fn get(&self, word: &str) -> u64 {
        self.0.get(word).copied().unwrap_or(0)
    }

    /// Number of distinct words.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all counts, i.e. the number of tokens in the batch.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(w, c)| (w.as_str(), *c))
    }
}

impl<S: AsRef<str>> FromIterator<(S, u64)> for WordCount {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut wc = WordCount::new();
        for (w, n) in iter {
            wc.add_n(w.as_ref(), n);
        }
        wc
    }
}
