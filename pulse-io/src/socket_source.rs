use std::time::Duration;

use async_trait::async_trait;
use pulse_core::config::ConnectConfig;
use pulse_core::{Error, LineSource, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Bounded exponential backoff for (re)connecting to the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means a single attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &ConnectConfig) -> Result<Self> {
        Ok(Self {
            max_retries: cfg.max_retries,
            initial_backoff: cfg.initial_backoff()?,
            max_backoff: cfg.max_backoff()?,
        })
    }

    /// Delay before retry number `retry` (1-based), doubling up to `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

pub async fn connect_with_retry(addr: &str, policy: &RetryPolicy) -> Result<TcpStream> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!(%addr, attempt, "connected to line source");
                return Ok(stream);
            }
            Err(source) if attempt > policy.max_retries => {
                return Err(Error::Connection {
                    addr: addr.to_string(),
                    attempts: attempt,
                    source,
                });
            }
            Err(e) => {
                let backoff = policy.backoff(attempt);
                warn!(
                    %addr,
                    attempt,
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "connect failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Receives newline-delimited UTF-8 text from a TCP server.
///
/// A background task owns the socket and pushes each line into an unbounded
/// channel; `drain` takes whatever has arrived so far. When the server closes
/// the connection the task reconnects with the same retry policy, and a
/// reconnect that runs out of retries surfaces from the next `drain`.
pub struct SocketLineSource {
    addr: String,
    rx: mpsc::UnboundedReceiver<Result<String>>,
    reader: JoinHandle<()>,
}

impl SocketLineSource {
    pub async fn connect(addr: impl Into<String>, policy: RetryPolicy) -> Result<Self> {
        let addr = addr.into();
        let stream = connect_with_retry(&addr, &policy).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(addr.clone(), stream, policy, tx));
        Ok(Self { addr, rx, reader })
    }
}

impl Drop for SocketLineSource {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl LineSource for SocketLineSource {
    async fn drain(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(Ok(line)) => lines.push(line),
                Ok(Err(e)) => return Err(e),
                Err(TryRecvError::Empty) => return Ok(lines),
                Err(TryRecvError::Disconnected) => {
                    return Err(Error::Io(std::io::Error::other(format!(
                        "reader for {} stopped unexpectedly",
                        self.addr
                    ))));
                }
            }
        }
    }
}

async fn read_loop(addr: String, mut stream: TcpStream, policy: RetryPolicy, tx: mpsc::UnboundedSender<Result<String>>) {
    let mut buf = Vec::new();
    loop {
        let mut reader = BufReader::new(stream);
        let cause = loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break "peer closed the connection".to_string(),
                Ok(_) => {
                    let Some(line) = decode_line(&buf) else { continue };
                    pulse_core::metrics::LINES_RECEIVED.inc();
                    if tx.send(Ok(line)).is_err() {
                        return;
                    }
                }
                Err(e) => break e.to_string(),
            }
        };
        if tx.is_closed() {
            return;
        }
        warn!(%addr, %cause, "line source disconnected, reconnecting");
        pulse_core::metrics::SOURCE_RECONNECTS.inc();
        match connect_with_retry(&addr, &policy).await {
            Ok(s) => stream = s,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

/// Strips the line terminator. Invalid UTF-8 counts as zero tokens.
fn decode_line(raw: &[u8]) -> Option<String> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(s) => Some(s.to_owned()),
        Err(e) => {
            warn!(error = %e, bytes = raw.len(), "dropping line that is not valid UTF-8");
            None
        }
    }
}
