//! qcflow-logger - forwards run metadata from stdin to a tracking server
//!
//! Reads one JSON object per line, each naming a run and a metric, param or
//! tag, and logs it through the asynchronous logging queue:
//!
//! ```text
//! {"run_id": "r1", "type": "metric", "key": "loss", "value": 0.5, "step": 1}
//! {"run_id": "r1", "type": "param", "key": "lr", "value": "0.01"}
//! {"run_id": "r1", "type": "tag", "key": "stage", "value": "train"}
//! ```
//!
//! The queue is stopped on EOF or Ctrl+C, waiting at most
//! `QCFLOW_ASYNC_LOGGING_SHUTDOWN_GRACE_SECONDS` for pending writes.
//!
//! ## Configuration
//!
//! - `QCFLOW_TRACKING_URI`: tracking server URL, or `memory:` for a dry run
//! - `QCFLOW_ASYNC_LOGGING_*`: queue sizing, batching and shutdown
//! - `QCFLOW_HTTP_REQUEST_*`: retry and timeout behavior
//! - `RUST_LOG`: Logging level filter (default: info)

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use qcflow_client::config::Settings;
use qcflow_client::entities::LogItem;
use qcflow_client::store::store_for_uri;
use qcflow_client::tracking::TrackingClient;

/// One input line.
#[derive(Debug, Deserialize)]
struct Record {
    /// Falls back to the session run when absent
    #[serde(default)]
    run_id: Option<String>,

    #[serde(flatten)]
    item: LogItem,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct IngestStats {
    lines: u64,
    enqueued: u64,
    malformed: u64,
    rejected: u64,
}

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Starting qcflow-logger...");

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let tracking_uri = match settings.require_tracking_uri() {
        Ok(uri) => uri.to_string(),
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let store = match store_for_uri(&tracking_uri, &settings.http) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to create tracking store");
            std::process::exit(1);
        }
    };

    info!(
        tracking_uri = %tracking_uri,
        workers = settings.async_logging.worker_count,
        queue_size = settings.async_logging.queue_size,
        shutdown_grace_secs = settings.async_logging.shutdown_grace.as_secs(),
        "Configuration loaded"
    );

    let client = TrackingClient::new(store, &settings);
    let session_run_id = Uuid::new_v4().simple().to_string();
    info!(run_id = %session_run_id, "Records without a run_id are logged to the session run");
    let mut stats = IngestStats::default();

    {
        let reader = forward_records(
            &client,
            &session_run_id,
            BufReader::new(tokio::io::stdin()),
            &mut stats,
        );
        tokio::pin!(reader);

        tokio::select! {
            () = &mut reader => {
                info!("End of input reached");
            }
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Shutdown signal received, stopping..."),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            },
        }
    }

    info!(
        lines = stats.lines,
        enqueued = stats.enqueued,
        malformed = stats.malformed,
        rejected = stats.rejected,
        "Input closed, stopping logging queue"
    );

    let report = client.shutdown().await;
    info!(
        flushed = report.flushed,
        failed = report.failed,
        dropped = report.dropped,
        timed_out = report.timed_out,
        "qcflow-logger stopped"
    );

    if report.dropped > 0 || report.failed > 0 {
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Parse one input line; blank lines yield `None`.
fn parse_record(line: &str) -> Result<Option<Record>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Enqueue every record read from `input` until EOF.
///
/// Malformed lines and items failing validation are logged and skipped.
async fn forward_records<R>(
    client: &TrackingClient,
    session_run_id: &str,
    input: R,
    stats: &mut IngestStats,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read input");
                break;
            }
        };
        stats.lines += 1;

        let record = match parse_record(&line) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                warn!(line = stats.lines, error = %e, "Skipping malformed record");
                stats.malformed += 1;
                continue;
            }
        };

        let run_id = record.run_id.as_deref().unwrap_or(session_run_id);
        match client.log_items(run_id, vec![record.item], false).await {
            Ok(_) => stats.enqueued += 1,
            Err(e) => {
                warn!(line = stats.lines, run_id = %run_id, error = %e, "Record rejected");
                stats.rejected += 1;
            }
        }
    }
}
