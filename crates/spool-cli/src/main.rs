use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spool_core::impls::LoggingConsumer;
use spool_core::{
    Batch, BatchConsumer, BufferConfig, BufferStats, ConsumerError, Producer, QueueBuffer,
    RunningBuffer, ShutdownReport,
};

/// バッチを JSON 1 行で stdout に書く consumer
struct StdoutConsumer;

#[derive(Serialize)]
struct BatchLine<'a> {
    batch_id: String,
    sealed_at: String,
    tasks: Vec<&'a str>,
}

#[async_trait]
impl BatchConsumer for StdoutConsumer {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn consume(&self, batch: &Batch) -> Result<(), ConsumerError> {
        let line = BatchLine {
            batch_id: batch.id().to_string(),
            sealed_at: batch.sealed_at().to_rfc3339(),
            tasks: batch.iter().map(|t| t.as_str()).collect(),
        };
        println!("{}", serde_json::to_string(&line)?);
        Ok(())
    }
}

#[derive(Serialize)]
struct ExitSummary {
    stats: BufferStats,
    shutdown: ShutdownReport,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cfg = load_config()?;
    info!(
        max_batch_elements = cfg.max_batch_elements,
        batch_timeout_secs = cfg.batch_timeout_secs,
        spool = %cfg.persistence_file().display(),
        "configuration loaded"
    );

    // (A) consumer を登録してバッファを組み立てる
    let buffer = QueueBuffer::builder()
        .config(cfg)
        .register(LoggingConsumer::new())?
        .register(StdoutConsumer)?
        .build()?;

    // (B) 前回の残りを読み込んでループを起動
    let running = buffer.start().await;

    // (C) stdin の各行をタスクとして投入
    let feeder = tokio::spawn(feed_stdin(running.producer()));

    // (D) シグナルか stdin の EOF まで待つ
    tokio::select! {
        _ = wait_for_shutdown() => {}
        fed = feeder => {
            match fed {
                Ok(n) => info!(tasks = n, "stdin closed, waiting for the buffer to drain"),
                Err(err) => warn!(error = %err, "stdin reader failed"),
            }
            tokio::select! {
                _ = wait_for_shutdown() => {}
                _ = wait_until_idle(&running) => {}
            }
        }
    }

    // (E) 未配送分をスプールして終了
    let stats = running.stats().await;
    let shutdown = running.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&ExitSummary { stats, shutdown })?);
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load `spool.toml` (or `$SPOOL_CONFIG`) with `SPOOL_*` environment overrides.
///
/// `SPOOL_MAX_BATCH_ELEMENTS=50` overrides `max_batch_elements`.
fn load_config() -> anyhow::Result<BufferConfig> {
    let path = std::env::var("SPOOL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("spool.toml"));

    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("SPOOL").try_parsing(true))
        .build()?;

    Ok(settings.try_deserialize()?)
}

async fn feed_stdin(producer: Producer) -> usize {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut fed = 0;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "failed to read stdin");
                break;
            }
        };
        if line.is_empty() {
            continue;
        }
        if let Err(err) = producer.produce(line).await {
            warn!(error = %err, "buffer refused task, stopping stdin reader");
            break;
        }
        fed += 1;
    }
    fed
}

/// Returns once every produced or recovered task has been dispatched.
async fn wait_until_idle(running: &RunningBuffer) {
    loop {
        let stats = running.stats().await;
        if stats.tasks_dispatched >= stats.produced + stats.recovered {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
