//! QCFlow Tracking Client
//!
//! This library provides the client side of experiment tracking:
//!
//! - **env** / **config**: typed environment variables and the `Settings` snapshot
//! - **credentials** / **headers**: per-request authentication and headers
//! - **entities**: metrics, params, tags and the `log-batch` wire format
//! - **transport**: HTTP client with retries, backoff and `Retry-After` handling
//! - **store**: the `TrackingStore` trait with REST and in-memory stores
//! - **async_logging**: bounded per-run queue drained by a worker pool
//! - **tracking**: the logging facade used by applications
//! - **data**: dataset sources, schemas and digests
//! - **deployments**: deployment target resolution and plugins
//! - **auth**: tracking server auth configuration
//!
//! # Example
//!
//! ```no_run
//! use qcflow_client::config::Settings;
//! use qcflow_client::entities::Metric;
//! use qcflow_client::store::store_for_uri;
//! use qcflow_client::tracking::TrackingClient;
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = Settings::from_env().expect("Failed to load settings");
//!     let uri = settings.require_tracking_uri().expect("No tracking URI");
//!     let store = store_for_uri(uri, &settings.http).expect("Failed to create store");
//!
//!     let client = TrackingClient::new(store, &settings);
//!     client
//!         .log_metric("run-1", Metric::new("loss", 0.5).with_step(1), false)
//!         .await
//!         .expect("Failed to enqueue metric");
//!     client.end_run("run-1").await.expect("Failed to flush run");
//!     client.shutdown().await;
//! }
//! ```

pub mod async_logging;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod data;
pub mod deployments;
pub mod entities;
pub mod env;
pub mod headers;
pub mod store;
pub mod tracking;
pub mod transport;

pub use async_logging::{
    AsyncLoggingQueue, FlushError, FullPolicy, LoggingError, QueueConfig, QueueError, QueueStats,
    RunOperation, ShutdownReport,
};
pub use config::{ConfigError, Settings};
pub use credentials::{get_default_host_creds, HostCreds};
pub use entities::{LogBatch, LogItem, Metric, Param, RunTag, ValidationError};
pub use store::{store_for_uri, InMemoryStore, RestStore, StoreError, TrackingStore};
pub use tracking::{TrackingClient, TrackingError};
pub use transport::{RetryPolicy, Transport, TransportError};
