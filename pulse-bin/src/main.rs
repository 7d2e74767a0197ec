use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context as _;
use axum::{routing::get, Router};
use clap::{error::ErrorKind, CommandFactory, Parser};
use pulse_core::config::{PipelineConfig, SourceConfig, TuningConfig, DEFAULT_BATCH_INTERVAL};
use tokio::sync::watch;

mod pipeline;

/// Counts words received over TCP in fixed batches and appends one line per
/// batch to a file. Restarting with the same checkpoint directory resumes the
/// previous run instead of starting over.
///
/// To try it locally, start a server with `nc -lk 9999` and run
/// `pulse-wordcount localhost 9999 /tmp/pulse-ckpt /tmp/pulse-out.txt`.
#[derive(Parser, Debug)]
#[command(name = "pulse-wordcount", version)]
struct Cli {
    /// Host of the TCP server emitting newline-delimited text
    host: String,
    /// Port of the TCP server
    port: u16,
    /// Directory for checkpoint data (absolute path)
    checkpoint_dir: PathBuf,
    /// File the word counts are appended to (absolute path)
    output_file: PathBuf,
    /// TOML file with tuning knobs (batch interval, connect retries)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Batch interval for a fresh start, e.g. "1s" or "500ms"
    #[arg(long)]
    batch_interval: Option<String>,
    /// Serve Prometheus metrics on this port (0 disables)
    #[arg(long, default_value_t = 0)]
    http_port: u16,
}

impl Cli {
    /// Command line beats the tuning file, which beats the defaults.
    async fn resolve(&self) -> pulse_core::Result<(PipelineConfig, TuningConfig)> {
        let tuning = match &self.config {
            Some(path) => TuningConfig::from_file(path).await?,
            None => TuningConfig::default(),
        };
        let interval = self
            .batch_interval
            .clone()
            .or_else(|| tuning.batch_interval.clone())
            .unwrap_or_else(|| DEFAULT_BATCH_INTERVAL.to_string());
        let config = PipelineConfig::new(
            SourceConfig::new(self.host.clone(), self.port),
            &self.checkpoint_dir,
            &self.output_file,
        )
        .with_batch_interval(interval);
        config.validate()?;
        Ok((config, tuning))
    }
}

fn app() -> Router {
    Router::new().route("/metrics", get(metrics))
}

async fn metrics() -> String {
    pulse_core::metrics::render_prometheus()
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn stop_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {}
        _ = term => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let (config, tuning) = match cli.resolve().await {
        Ok(v) => v,
        // usage on stderr and a non-zero exit, same as a missing argument
        Err(e) => Cli::command().error(ErrorKind::ValueValidation, e).exit(),
    };

    if cli.http_port != 0 {
        let addr: SocketAddr = ([127, 0, 0, 1], cli.http_port).into();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("cannot bind metrics endpoint on {addr}"))?;
        tracing::info!("serving /metrics on {}", addr);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app()).await;
        });
    }

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        stop_signal().await;
        tracing::info!("stop requested, finishing the current batch");
        let _ = stop.send(true);
    });

    pipeline::run(config, tuning, shutdown)
        .await
        .context("word count pipeline failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{self, Body};
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("pulse-wordcount").chain(args.iter().copied()))
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_text() {
        let app = app();
        // Touch a metric
        pulse_core::metrics::BATCHES.with_label_values(&["committed"]).inc();
        let res = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(res.status().is_success());
        let body = body::to_bytes(res.into_body(), 1_048_576).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("pulse_batches_total"));
    }

    #[test]
    fn all_four_positionals_are_required() {
        let err = parse(&["localhost", "9999", "/tmp/ckpt"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        let err = parse(&["localhost", "not-a-port", "/tmp/ckpt", "/tmp/out"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[tokio::test]
    async fn resolve_applies_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        let tuning = tmp.path().join("tuning.toml");
        tokio::fs::write(&tuning, "batch_interval = \"3s\"\n[connect]\nmax_retries = 1\n")
            .await
            .unwrap();
        let tuning = tuning.to_string_lossy().to_string();

        let cli = parse(&["localhost", "9999", "/tmp/ckpt", "/tmp/out", "--config", &tuning]).unwrap();
        let (cfg, t) = cli.resolve().await.unwrap();
        assert_eq!(cfg.batch_interval, "3s");
        assert_eq!(t.connect.max_retries, 1);

        let cli = parse(&[
            "localhost", "9999", "/tmp/ckpt", "/tmp/out", "--config", &tuning, "--batch-interval", "250ms",
        ])
        .unwrap();
        let (cfg, _) = cli.resolve().await.unwrap();
        assert_eq!(cfg.batch_interval, "250ms");

        let cli = parse(&["localhost", "9999", "/tmp/ckpt", "/tmp/out"]).unwrap();
        assert_eq!(cli.resolve().await.unwrap().0.batch_interval, DEFAULT_BATCH_INTERVAL);
    }

    #[tokio::test]
    async fn resolve_rejects_relative_paths() {
        let cli = parse(&["localhost", "9999", "ckpt", "/tmp/out"]).unwrap();
        assert!(matches!(cli.resolve().await, Err(pulse_core::Error::Config(_))));
    }
}
