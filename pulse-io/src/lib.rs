//! pulse-io: the network source and the file sink.
//! - `SocketLineSource`: reads newline-delimited text from a TCP server into a buffer
//! - `FileSink`: appends one human-readable line per batch to an output file

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pulse_core::{BatchSink, BatchTime, Error, Result, WordCount};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub mod socket_source;
pub use socket_source::{RetryPolicy, SocketLineSource};

/// Renders `Counts at time <t> ms [word:count, ...]`, words in ascending order.
pub fn format_batch_line(time: BatchTime, counts: &WordCount) -> String {
    let body = counts
        .iter()
        .map(|(w, c)| format!("{w}:{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("Counts at time {time} [{body}]")
}

/// Appends each batch as a single line to a file, creating it if absent.
pub struct FileSink {
    pub path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Removes any previous output before a fresh start. A missing file is fine.
    pub async fn truncate(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), "deleted previous output");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::SinkWrite {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        f.write_all(line.as_bytes()).await?;
        f.write_all(b"\n").await?;
        f.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl BatchSink for FileSink {
    async fn append(&mut self, time: BatchTime, counts: &WordCount) -> Result<()> {
        let line = format_batch_line(time, counts);
        info!("{}", line);
        debug!(path = %self.path.display(), "appending batch");
        self.write_line(&line).await.map_err(|source| Error::SinkWrite {
            path: self.path.clone(),
            source,
        })?;
        pulse_core::metrics::BYTES_WRITTEN
            .with_label_values(&["FileSink"])
            .inc_by((line.len() + 1) as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_line_format() {
        let wc: WordCount = [("the", 2), ("cat", 1)].into_iter().collect();
        assert_eq!(
            format_batch_line(BatchTime(1_700_000_001_000), &wc),
            "Counts at time 1700000001000 ms [cat:1, the:2]"
        );
        assert_eq!(
            format_batch_line(BatchTime(5_000), &WordCount::new()),
            "Counts at time 5000 ms []"
        );
    }

    #[tokio::test]
    async fn file_sink_appends_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.txt");
        let mut sink = FileSink::new(&path);
        let wc: WordCount = [("a", 1)].into_iter().collect();
        sink.append(BatchTime(1_000), &wc).await.unwrap();
        sink.append(BatchTime(2_000), &WordCount::new()).await.unwrap();

        let data = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = data.lines().collect();
        assert_eq!(lines, ["Counts at time 1000 ms [a:1]", "Counts at time 2000 ms []"]);
    }

    #[tokio::test]
    async fn sink_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        tokio::fs::write(&path, "earlier run\n").await.unwrap();
        FileSink::new(&path).append(BatchTime(1_000), &WordCount::new()).await.unwrap();
        let data = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(data.starts_with("earlier run\n"));
        assert_eq!(data.lines().count(), 2);
    }

    #[tokio::test]
    async fn truncate_removes_file_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        FileSink::truncate(&path).await.unwrap();
        tokio::fs::write(&path, "old\n").await.unwrap();
        FileSink::truncate(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unwritable_target_is_a_sink_error() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be opened for appending
        let mut sink = FileSink::new(dir.path());
        let err = sink.append(BatchTime(1_000), &WordCount::new()).await.unwrap_err();
        assert!(matches!(err, Error::SinkWrite { .. }));
    }
}
