use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{BatchInterval, Error, Result};

pub const DEFAULT_BATCH_INTERVAL: &str = "1s";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
}

impl SourceConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Everything needed to rebuild the pipeline. Persisted inside every checkpoint.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub checkpoint_dir: PathBuf,
    pub output_path: PathBuf,
    #[serde(default = "default_batch_interval")]
    pub batch_interval: String, // e.g., "1s"
}

fn default_batch_interval() -> String {
    DEFAULT_BATCH_INTERVAL.to_string()
}

impl PipelineConfig {
    pub fn new(source: SourceConfig, checkpoint_dir: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            checkpoint_dir: checkpoint_dir.into(),
            output_path: output_path.into(),
            batch_interval: default_batch_interval(),
        }
    }

    pub fn with_batch_interval(mut self, interval: impl Into<String>) -> Self {
        self.batch_interval = interval.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.host.trim().is_empty() {
            return Err(Error::Config("source host must not be empty".into()));
        }
        if self.source.port == 0 {
            return Err(Error::Config("source port must be in 1..=65535".into()));
        }
        require_absolute("checkpoint directory", &self.checkpoint_dir)?;
        require_absolute("output file", &self.output_path)?;
        if self.checkpoint_dir == self.output_path {
            return Err(Error::Config("checkpoint directory and output file must differ".into()));
        }
        self.batch_interval()?;
        Ok(())
    }

    pub fn batch_interval(&self) -> Result<BatchInterval> {
        BatchInterval::parse(&self.batch_interval)
    }
}

fn require_absolute(what: &str, p: &Path) -> Result<()> {
    if p.as_os_str().is_empty() || !p.is_absolute() {
        return Err(Error::Config(format!("{what} must be an absolute path, got {:?}", p)));
    }
    Ok(())
}

/// Retry policy for reaching the line source.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff: String,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff() -> String {
    "500ms".to_string()
}

fn default_max_backoff() -> String {
    "10s".to_string()
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl ConnectConfig {
    pub fn initial_backoff(&self) -> Result<Duration> {
        Ok(Duration::from_millis(non_negative(&self.initial_backoff)?))
    }

    pub fn max_backoff(&self) -> Result<Duration> {
        Ok(Duration::from_millis(non_negative(&self.max_backoff)?))
    }
}

fn non_negative(s: &str) -> Result<u64> {
    let ms = parse_duration_ms(s)?;
    u64::try_from(ms).map_err(|_| Error::Config(format!("duration must not be negative: {s}")))
}

/// Optional knobs read from a TOML file. Anything left out keeps its default.
///
/// ```toml
/// batch_interval = "2s"
///
/// [connect]
/// max_retries = 10
/// initial_backoff = "250ms"
/// max_backoff = "5s"
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct TuningConfig {
    #[serde(default)]
    pub batch_interval: Option<String>,
    #[serde(default)]
    pub connect: ConnectConfig,
}

impl TuningConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: TuningConfig = toml::from_str(text).map_err(|e| Error::Config(format!("invalid tuning file: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(i) = &self.batch_interval {
            BatchInterval::parse(i)?;
        }
        if self.connect.initial_backoff()? > self.connect.max_backoff()? {
            return Err(Error::Config("connect.initial_backoff must not exceed connect.max_backoff".into()));
        }
        Ok(())
    }
}

pub fn parse_duration_ms(s: &str) -> Result<i64> {
    // very small parser for values like "10s", "500ms", "2m"
    let s = s.trim();
    let (num, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 3_600_000)
    } else {
        // default assume seconds
        (s, 1_000)
    };
    let n = num
        .trim()
        .parse::<i64>()
        .map_err(|_| Error::Config(format!("invalid duration: {s:?}")))?;
    n.checked_mul(unit)
        .ok_or_else(|| Error::Config(format!("duration out of range: {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> PipelineConfig {
        PipelineConfig::new(SourceConfig::new("localhost", 9999), "/tmp/ckpt", "/tmp/out.txt")
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration_ms("500ms").unwrap(), 500);
        assert_eq!(parse_duration_ms("10s").unwrap(), 10_000);
        assert_eq!(parse_duration_ms("2m").unwrap(), 120_000);
        assert_eq!(parse_duration_ms("1h").unwrap(), 3_600_000);
        assert_eq!(parse_duration_ms(" 3 ").unwrap(), 3_000);
        assert!(matches!(parse_duration_ms("fast"), Err(Error::Config(_))));
    }

    #[test]
    fn oversized_durations_are_config_errors() {
        assert!(matches!(parse_duration_ms("9223372036854775807s"), Err(Error::Config(_))));
        assert!(matches!(parse_duration_ms("-9223372036854775807h"), Err(Error::Config(_))));
        assert!(matches!(parse_duration_ms("9223372036854775807"), Err(Error::Config(_))));
        assert_eq!(parse_duration_ms("9223372036854775807ms").unwrap(), i64::MAX);
        // in range for the parser, still rejected as a batch interval
        assert!(valid().with_batch_interval("9223372036854775807ms").validate().is_err());
    }

    #[test]
    fn pipeline_config_validation() {
        assert!(valid().validate().is_ok());

        let mut c = valid();
        c.source.port = 0;
        assert!(matches!(c.validate(), Err(Error::Config(_))));

        let mut c = valid();
        c.output_path = PathBuf::from("relative/out.txt");
        assert!(matches!(c.validate(), Err(Error::Config(_))));

        let mut c = valid();
        c.source.host = "  ".into();
        assert!(c.validate().is_err());

        assert!(valid().with_batch_interval("0s").validate().is_err());
        assert_eq!(valid().with_batch_interval("2s").batch_interval().unwrap().as_millis(), 2_000);
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        assert_eq!(SourceConfig::new("::1", 9999).addr(), "[::1]:9999");
        assert_eq!(SourceConfig::new("localhost", 9999).addr(), "localhost:9999");
    }

    #[test]
    fn tuning_defaults_and_overrides() {
        let t = TuningConfig::from_toml_str("").unwrap();
        assert_eq!(t, TuningConfig::default());
        assert_eq!(t.connect.max_retries, 5);

        let t = TuningConfig::from_toml_str(
            r#"
            batch_interval = "2s"
            [connect]
            max_retries = 1
            initial_backoff = "10ms"
            "#,
        )
        .unwrap();
        assert_eq!(t.batch_interval.as_deref(), Some("2s"));
        assert_eq!(t.connect.max_retries, 1);
        assert_eq!(t.connect.initial_backoff().unwrap(), Duration::from_millis(10));
        assert_eq!(t.connect.max_backoff().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn tuning_rejects_bad_values() {
        assert!(TuningConfig::from_toml_str("batch_interval = \"0ms\"").is_err());
        assert!(TuningConfig::from_toml_str("[connect]\ninitial_backoff = \"1m\"\nmax_backoff = \"1s\"").is_err());
        assert!(TuningConfig::from_toml_str("not toml at all [").is_err());
    }
}
