//! Tracking store backends.
//!
//! [`TrackingStore`] is the seam between the logging engine and the place run
//! metadata ends up. [`RestStore`] talks to a tracking server;
//! [`InMemoryStore`] keeps everything in process and is what the tests and the
//! daemon's dry-run mode use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::HttpSettings;
use crate::credentials::{get_default_host_creds, CredentialsError, HostCreds};
use crate::entities::{LogBatch, Metric, Param, RunTag};
use crate::transport::{HttpRequest, RetryPolicy, Transport, TransportError};

/// Path of the batch logging endpoint.
pub const LOG_BATCH_ENDPOINT: &str = "/api/2.0/qcflow/runs/log-batch";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    #[error(
        "Changing param values is not allowed. Param with key {key:?} was already logged \
         with value {old_value:?} for run {run_id}. Attempted logging new value {new_value:?}."
    )]
    ParamConflict {
        run_id: String,
        key: String,
        old_value: String,
        new_value: String,
    },

    #[error("Run {0} not found")]
    RunNotFound(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Destination of run metadata.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Persist one batch for a run. Entities within a kind are applied in order.
    async fn log_batch(&self, run_id: &str, batch: LogBatch) -> Result<(), StoreError>;
}

#[derive(Serialize)]
struct LogBatchRequest<'a> {
    run_id: &'a str,
    metrics: &'a [Metric],
    params: &'a [Param],
    tags: &'a [RunTag],
}

/// Store backed by a tracking server's REST API.
///
/// Credentials are resolved again for every request so rotated passwords and
/// tokens are picked up without restarting.
#[derive(Debug)]
pub struct RestStore {
    host: String,
    transport: Transport,
}

impl RestStore {
    pub fn new(host: impl Into<String>, http: &HttpSettings) -> Result<Self, StoreError> {
        let host = host.into();
        let tls = get_default_host_creds(&host)?;
        let transport = Transport::new(http, RetryPolicy::tracking(http), &tls)?;
        Ok(Self::with_transport(host, transport))
    }

    /// Use a preconfigured transport.
    pub fn with_transport(host: impl Into<String>, transport: Transport) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            transport,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    fn host_creds(&self) -> Result<HostCreds, StoreError> {
        Ok(get_default_host_creds(&self.host)?)
    }
}

#[async_trait]
impl TrackingStore for RestStore {
    async fn log_batch(&self, run_id: &str, batch: LogBatch) -> Result<(), StoreError> {
        let creds = self.host_creds()?;

        for chunk in batch.into_chunks() {
            let body = LogBatchRequest {
                run_id,
                metrics: &chunk.metrics,
                params: &chunk.params,
                tags: &chunk.tags,
            };
            let request = HttpRequest::post(LOG_BATCH_ENDPOINT).json(&body)?;
            self.transport.send(&request, &creds).await?;

            debug!(
                run_id = %run_id,
                metrics = chunk.metrics.len(),
                params = chunk.params.len(),
                tags = chunk.tags.len(),
                "Logged batch"
            );
        }
        Ok(())
    }
}

/// Everything logged against one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunData {
    /// Full history per metric key, in logging order
    pub metrics: HashMap<String, Vec<Metric>>,
    pub params: HashMap<String, String>,
    pub tags: HashMap<String, String>,
}

/// Process-local store.
///
/// Metrics append to a per-key history, params are write-once (re-logging the
/// same value is accepted) and tags keep the last written value.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    runs: Arc<Mutex<HashMap<String, RunData>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a run, if anything was logged for it.
    pub fn run(&self, run_id: &str) -> Option<RunData> {
        self.runs.lock().ok()?.get(run_id).cloned()
    }

    /// Values of a metric's history, in logging order.
    pub fn metric_history(&self, run_id: &str, key: &str) -> Vec<f64> {
        self.run(run_id)
            .and_then(|run| run.metrics.get(key).cloned())
            .map(|history| history.iter().map(|m| m.value).collect())
            .unwrap_or_default()
    }

    pub fn run_ids(&self) -> Vec<String> {
        self.runs
            .lock()
            .map(|runs| runs.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TrackingStore for InMemoryStore {
    async fn log_batch(&self, run_id: &str, batch: LogBatch) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().map_err(|_| StoreError::Poisoned)?;
        let run = runs.entry(run_id.to_string()).or_default();

        // Validate params first so a conflicting batch leaves the run untouched.
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for param in &batch.params {
            let existing = run
                .params
                .get(&param.key)
                .map(String::as_str)
                .or_else(|| seen.get(param.key.as_str()).copied());
            if let Some(existing) = existing {
                if existing != param.value {
                    return Err(StoreError::ParamConflict {
                        run_id: run_id.to_string(),
                        key: param.key.clone(),
                        old_value: existing.to_string(),
                        new_value: param.value.clone(),
                    });
                }
            }
            seen.insert(&param.key, &param.value);
        }

        for param in batch.params {
            run.params.insert(param.key, param.value);
        }
        for tag in batch.tags {
            run.tags.insert(tag.key, tag.value);
        }
        for metric in batch.metrics {
            run.metrics.entry(metric.key.clone()).or_default().push(metric);
        }
        Ok(())
    }
}

/// Build the store for a tracking URI.
///
/// `memory:` selects the in-process store; anything else is treated as the
/// base URL of a tracking server.
pub fn store_for_uri(
    tracking_uri: &str,
    http: &HttpSettings,
) -> Result<Arc<dyn TrackingStore>, StoreError> {
    if tracking_uri == "memory:" {
        info!("Using in-memory tracking store");
        return Ok(Arc::new(InMemoryStore::new()));
    }
    info!(host = %tracking_uri, "Using REST tracking store");
    Ok(Arc::new(RestStore::new(tracking_uri, http)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvGuard;
    use mockito::{Matcher, Server};
    use serial_test::serial;

    #[tokio::test]
    async fn test_in_memory_metric_history_in_order() {
        let store = InMemoryStore::new();
        let batch = LogBatch {
            metrics: vec![Metric::new("loss", 0.5), Metric::new("loss", 0.4).with_step(1)],
            ..LogBatch::default()
        };
        store.log_batch("run-1", batch).await.unwrap();
        store
            .log_batch("run-1", LogBatch::from_items(vec![Metric::new("loss", 0.3).into()]))
            .await
            .unwrap();

        assert_eq!(store.metric_history("run-1", "loss"), vec![0.5, 0.4, 0.3]);
        assert!(store.metric_history("run-2", "loss").is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_param_conflict() {
        let store = InMemoryStore::new();
        let first = LogBatch::from_items(vec![Param::new("lr", "0.01").into()]);
        store.log_batch("run-1", first.clone()).await.unwrap();
        // Same value again is accepted.
        store.log_batch("run-1", first).await.unwrap();

        let conflicting = LogBatch::from_items(vec![
            Param::new("lr", "0.02").into(),
            RunTag::new("stage", "dev").into(),
        ]);
        let err = store.log_batch("run-1", conflicting).await.unwrap_err();
        assert!(matches!(err, StoreError::ParamConflict { ref key, .. } if key == "lr"));

        let run = store.run("run-1").unwrap();
        assert_eq!(run.params.get("lr").map(String::as_str), Some("0.01"));
        assert!(run.tags.is_empty());

        // Another run may use any value.
        store
            .log_batch("run-2", LogBatch::from_items(vec![Param::new("lr", "0.02").into()]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_tags_overwrite() {
        let store = InMemoryStore::new();
        let batch = LogBatch::from_items(vec![
            RunTag::new("stage", "dev").into(),
            RunTag::new("stage", "prod").into(),
        ]);
        store.log_batch("run-1", batch).await.unwrap();
        let run = store.run("run-1").unwrap();
        assert_eq!(run.tags.get("stage").map(String::as_str), Some("prod"));
    }

    #[tokio::test]
    #[serial]
    async fn test_rest_store_posts_log_batch() {
        let _u = EnvGuard::remove("QCFLOW_TRACKING_USERNAME");
        let _p = EnvGuard::remove("QCFLOW_TRACKING_PASSWORD");
        let _t = EnvGuard::set("QCFLOW_TRACKING_TOKEN", "tok");
        let _home = EnvGuard::set("HOME", "/nonexistent-qcflow-home");

        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", LOG_BATCH_ENDPOINT)
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "run_id": "run-1",
                "params": [{"key": "lr", "value": "0.01"}],
                "metrics": [{"key": "loss", "value": 0.5, "timestamp": 7, "step": 0}]
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let store = RestStore::new(server.url(), &HttpSettings::default()).unwrap();
        let batch = LogBatch::from_items(vec![
            Param::new("lr", "0.01").into(),
            Metric::new("loss", 0.5).with_timestamp(7).into(),
        ]);
        store.log_batch("run-1", batch).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_rest_store_splits_large_batches() {
        let _t = EnvGuard::remove("QCFLOW_TRACKING_TOKEN");
        let _home = EnvGuard::set("HOME", "/nonexistent-qcflow-home");

        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", LOG_BATCH_ENDPOINT)
            .with_status(200)
            .expect(3)
            .create_async()
            .await;

        let store = RestStore::new(server.url(), &HttpSettings::default()).unwrap();
        let mut batch = LogBatch::default();
        for i in 0..2500 {
            batch.push(Metric::new("loss", i as f64).with_step(i).into());
        }
        store.log_batch("run-1", batch).await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_store_for_memory_uri() {
        assert!(store_for_uri("memory:", &HttpSettings::default()).is_ok());
    }
}
