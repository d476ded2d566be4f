//! Run logging facade.
//!
//! [`TrackingClient`] validates what callers log and either writes it to the
//! store directly (`synchronous = true`) or routes it through the
//! [`AsyncLoggingQueue`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::async_logging::{
    AsyncLoggingQueue, FlushError, QueueConfig, QueueError, RunOperation, ShutdownReport,
};
use crate::config::Settings;
use crate::entities::{LogBatch, LogItem, Metric, Param, RunTag, ValidationError};
use crate::store::{StoreError, TrackingStore};

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Flush(#[from] FlushError),
}

/// Client for logging run metadata.
pub struct TrackingClient {
    store: Arc<dyn TrackingStore>,
    queue: AsyncLoggingQueue,
    truncate_long_values: bool,
    flush_timeout: Duration,
    shutdown_grace: Duration,
}

impl TrackingClient {
    /// Create a client and start its logging queue. Must be called within a
    /// tokio runtime.
    pub fn new(store: Arc<dyn TrackingStore>, settings: &Settings) -> Self {
        let queue = AsyncLoggingQueue::start(
            Arc::clone(&store),
            QueueConfig::from_settings(&settings.async_logging),
        );
        Self {
            store,
            queue,
            truncate_long_values: settings.truncate_long_values,
            flush_timeout: settings.async_logging.shutdown_grace,
            shutdown_grace: settings.async_logging.shutdown_grace,
        }
    }

    pub fn queue(&self) -> &AsyncLoggingQueue {
        &self.queue
    }

    pub async fn log_metric(
        &self,
        run_id: &str,
        metric: Metric,
        synchronous: bool,
    ) -> Result<RunOperation, TrackingError> {
        self.log_items(run_id, vec![metric.into()], synchronous).await
    }

    pub async fn log_param(
        &self,
        run_id: &str,
        key: impl Into<String>,
        value: impl Into<String>,
        synchronous: bool,
    ) -> Result<RunOperation, TrackingError> {
        self.log_items(run_id, vec![Param::new(key, value).into()], synchronous)
            .await
    }

    pub async fn set_tag(
        &self,
        run_id: &str,
        key: impl Into<String>,
        value: impl Into<String>,
        synchronous: bool,
    ) -> Result<RunOperation, TrackingError> {
        self.log_items(run_id, vec![RunTag::new(key, value).into()], synchronous)
            .await
    }

    /// Log metrics, params and tags together.
    pub async fn log_batch(
        &self,
        run_id: &str,
        batch: LogBatch,
        synchronous: bool,
    ) -> Result<RunOperation, TrackingError> {
        let items: Vec<LogItem> = batch
            .params
            .into_iter()
            .map(LogItem::from)
            .chain(batch.tags.into_iter().map(LogItem::from))
            .chain(batch.metrics.into_iter().map(LogItem::from))
            .collect();
        self.log_items(run_id, items, synchronous).await
    }

    /// Validate every item before anything is written, then write or enqueue.
    pub async fn log_items(
        &self,
        run_id: &str,
        items: Vec<LogItem>,
        synchronous: bool,
    ) -> Result<RunOperation, TrackingError> {
        let items = items
            .into_iter()
            .map(|item| item.validate(self.truncate_long_values))
            .collect::<Result<Vec<_>, _>>()?;

        if synchronous {
            self.store
                .log_batch(run_id, LogBatch::from_items(items))
                .await?;
            return Ok(RunOperation::completed(run_id));
        }
        Ok(self.queue.enqueue_all(run_id, items).await?)
    }

    /// Flush everything logged for the run before returning.
    pub async fn end_run(&self, run_id: &str) -> Result<(), TrackingError> {
        self.queue.flush(run_id, self.flush_timeout).await?;
        info!(run_id = %run_id, "Run ended");
        Ok(())
    }

    pub async fn flush_async_logging(&self) -> Result<(), TrackingError> {
        Ok(self.queue.flush_all(self.flush_timeout).await?)
    }

    /// Stop the logging queue with the configured grace period.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.queue.stop(self.shutdown_grace).await
    }
}
