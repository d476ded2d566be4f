//! Asynchronous logging queue.
//!
//! Callers enqueue run metadata and get back immediately; a fixed pool of
//! worker tasks batches the items per run and hands them to a
//! [`TrackingStore`]. Each run is pinned to one worker by a hash of its id, so
//! items of a run reach the store in enqueue order. Items of different runs
//! share no ordering.
//!
//! Each worker flushes its buffer when either:
//! - `batch_size` items are pending (size-based flush)
//! - the buffering window elapses (time-based flush)
//! - a caller asks for it through [`AsyncLoggingQueue::flush`] (forced flush)
//!
//! Without a buffering window a worker sends whatever is immediately available.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval_at, timeout, timeout_at, Instant, Interval};
use tracing::{debug, error, info, warn};

use crate::config::AsyncLoggingSettings;
use crate::entities::{LogBatch, LogItem, MAX_ENTITIES_PER_BATCH};
use crate::store::TrackingStore;

/// Configuration for the logging queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub worker_count: usize,

    /// Pending items per worker that trigger a flush
    pub batch_size: usize,

    /// Time-based flush window; `None` sends as soon as items are available
    pub buffering: Option<Duration>,

    /// Total capacity, split evenly between workers
    pub queue_size: usize,

    pub full_policy: FullPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from_settings(&AsyncLoggingSettings::default())
    }
}

impl QueueConfig {
    pub fn from_settings(settings: &AsyncLoggingSettings) -> Self {
        let full_policy = if settings.block_on_full {
            FullPolicy::Block {
                timeout: settings.enqueue_timeout,
            }
        } else {
            FullPolicy::FailFast
        };
        Self {
            worker_count: settings.worker_count.max(1),
            batch_size: MAX_ENTITIES_PER_BATCH,
            buffering: settings.buffering.filter(|window| !window.is_zero()),
            queue_size: settings.queue_size.max(1),
            full_policy,
        }
    }

    fn channel_capacity(&self) -> usize {
        (self.queue_size / self.worker_count.max(1)).max(1)
    }
}

/// What `enqueue` does when a worker's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullPolicy {
    /// Wait for room, up to `timeout`
    Block { timeout: Duration },

    /// Return [`QueueError::Full`] immediately
    FailFast,
}

/// Errors returned by `enqueue`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Logging queue is full ({capacity} items per worker), dropped item for run {run_id}")]
    Full { run_id: String, capacity: usize },

    #[error("Logging queue has been stopped")]
    Closed,
}

/// Permanent failure of an enqueued item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoggingError {
    #[error("Failed to log batch for run {run_id}: {message}")]
    Store { run_id: String, message: String },

    #[error("Logging worker panicked while logging run {run_id}: {message}")]
    Panicked { run_id: String, message: String },

    #[error("{count} item(s) for run {run_id} were dropped before being logged")]
    Dropped { run_id: String, count: u64 },
}

/// Errors returned by `flush` and `flush_all`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlushError {
    #[error("Timed out flushing {}: {pending} item(s) still pending", .run_id.as_deref().unwrap_or("all runs"))]
    Timeout {
        run_id: Option<String>,
        pending: u64,
    },

    #[error(transparent)]
    Failed(#[from] LoggingError),
}

/// Statistics about queue operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub items_received: u64,

    /// Items acknowledged by the store
    pub items_flushed: u64,

    pub items_failed: u64,

    /// Items abandoned at shutdown
    pub items_dropped: u64,

    pub size_flushes: u64,

    pub time_flushes: u64,

    pub forced_flushes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    items_received: AtomicU64,
    items_flushed: AtomicU64,
    items_failed: AtomicU64,
    items_dropped: AtomicU64,
    size_flushes: AtomicU64,
    time_flushes: AtomicU64,
    forced_flushes: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            items_received: self.items_received.load(Ordering::Relaxed),
            items_flushed: self.items_flushed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            size_flushes: self.size_flushes.load(Ordering::Relaxed),
            time_flushes: self.time_flushes.load(Ordering::Relaxed),
            forced_flushes: self.forced_flushes.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of shutting the queue down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub flushed: u64,
    pub failed: u64,

    /// Items still unacknowledged when the grace period ran out
    pub dropped: u64,

    pub timed_out: bool,
}

/// Handle on one or more enqueued items of a run.
#[derive(Debug)]
pub struct RunOperation {
    run_id: String,
    pending: Vec<oneshot::Receiver<Result<(), LoggingError>>>,
}

impl RunOperation {
    fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            pending: Vec::new(),
        }
    }

    /// An operation with nothing left to wait for.
    pub fn completed(run_id: impl Into<String>) -> Self {
        Self::new(run_id)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Combine with another operation on the same run.
    pub fn merge(mut self, other: RunOperation) -> Self {
        self.pending.extend(other.pending);
        self
    }

    /// Wait until every item is acknowledged; return the first failure.
    pub async fn wait(self) -> Result<(), LoggingError> {
        let mut first_error = None;
        for rx in self.pending {
            let outcome = rx.await.unwrap_or_else(|_| {
                Err(LoggingError::Dropped {
                    run_id: self.run_id.clone(),
                    count: 1,
                })
            });
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

struct QueuedItem {
    run_id: String,
    item: LogItem,
    done: oneshot::Sender<Result<(), LoggingError>>,
}

enum Command {
    Item(QueuedItem),
    Flush,
}

/// Per-run bookkeeping for `flush`. An entry lives while the run has items
/// in flight or failures not yet reported.
struct RunState {
    enqueued: u64,
    acked: watch::Sender<u64>,
    errors: Vec<LoggingError>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            enqueued: 0,
            acked: watch::channel(0).0,
            errors: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Shared {
    runs: Mutex<HashMap<String, RunState>>,
    counters: Counters,
}

impl Shared {
    /// Must run before the item is handed to a worker, so acks never
    /// outnumber enqueued items.
    fn record_enqueued(&self, run_id: &str, count: u64) {
        if let Ok(mut runs) = self.runs.lock() {
            runs.entry(run_id.to_string()).or_default().enqueued += count;
        }
    }

    /// Settle items that were counted but never reached a worker.
    fn record_rejected(&self, run_id: &str, count: u64) {
        if let Ok(mut runs) = self.runs.lock() {
            if let Some(state) = runs.get_mut(run_id) {
                state.acked.send_modify(|acked| *acked += count);
            }
            forget_if_settled(&mut runs, run_id);
        }
    }

    fn record_outcome(&self, run_id: &str, count: u64, outcome: &Result<(), LoggingError>) {
        if let Ok(mut runs) = self.runs.lock() {
            if let Some(state) = runs.get_mut(run_id) {
                if let Err(e) = outcome {
                    state.errors.push(e.clone());
                }
                state.acked.send_modify(|acked| *acked += count);
            }
            forget_if_settled(&mut runs, run_id);
        }
    }

    /// Snapshot of what `flush` has to wait for.
    fn flush_target(&self, run_id: &str) -> Option<(u64, watch::Receiver<u64>)> {
        let runs = self.runs.lock().ok()?;
        runs.get(run_id)
            .map(|state| (state.enqueued, state.acked.subscribe()))
    }

    fn take_error(&self, run_id: &str) -> Option<LoggingError> {
        let mut runs = self.runs.lock().ok()?;
        let state = runs.get_mut(run_id)?;
        if state.errors.is_empty() {
            return None;
        }
        let mut errors = std::mem::take(&mut state.errors).into_iter();
        forget_if_settled(&mut runs, run_id);
        let first = errors.next();
        let unreported = errors.count();
        if unreported > 0 {
            warn!(
                run_id = %run_id,
                additional_errors = unreported,
                "Multiple logging failures, reporting the first"
            );
        }
        first
    }

    fn run_count(&self) -> usize {
        self.runs.lock().map(|runs| runs.len()).unwrap_or_default()
    }

    fn run_ids(&self) -> Vec<String> {
        self.runs
            .lock()
            .map(|runs| runs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Mark every unacknowledged item as dropped; return how many there were.
    fn drop_pending(&self) -> u64 {
        let Ok(mut runs) = self.runs.lock() else {
            return 0;
        };
        let mut dropped = 0;
        for (run_id, state) in runs.iter_mut() {
            let acked = *state.acked.borrow();
            let missing = state.enqueued.saturating_sub(acked);
            if missing > 0 {
                dropped += missing;
                state.errors.push(LoggingError::Dropped {
                    run_id: run_id.clone(),
                    count: missing,
                });
                state.acked.send_modify(|acked| *acked += missing);
            }
        }
        dropped
    }
}

/// Drop the entry of a run with nothing in flight and nothing to report.
/// Flushes already waiting on it keep the final ack count.
fn forget_if_settled(runs: &mut HashMap<String, RunState>, run_id: &str) {
    let settled = runs
        .get(run_id)
        .is_some_and(|state| state.errors.is_empty() && *state.acked.borrow() >= state.enqueued);
    if settled {
        runs.remove(run_id);
    }
}

/// `now + limit`, saturating far in the future for huge limits.
fn deadline_after(limit: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(limit)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

/// Bounded, per-run FIFO logging queue with a fixed worker pool.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use qcflow_client::async_logging::{AsyncLoggingQueue, QueueConfig};
/// use qcflow_client::entities::Metric;
/// use qcflow_client::store::InMemoryStore;
///
/// #[tokio::main]
/// async fn main() {
///     let store = InMemoryStore::new();
///     let queue = AsyncLoggingQueue::start(Arc::new(store.clone()), QueueConfig::default());
///
///     queue.enqueue("run-1", Metric::new("loss", 0.5).into()).await.ok();
///     queue.flush("run-1", Duration::from_secs(5)).await.ok();
///     queue.stop(Duration::from_secs(5)).await;
/// }
/// ```
pub struct AsyncLoggingQueue {
    config: QueueConfig,
    senders: RwLock<Option<Arc<Vec<mpsc::Sender<Command>>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
    closed: AtomicBool,
    report: Mutex<Option<ShutdownReport>>,
}

impl AsyncLoggingQueue {
    /// Spawn the worker pool. Must be called within a tokio runtime.
    pub fn start(store: Arc<dyn TrackingStore>, config: QueueConfig) -> Self {
        let worker_count = config.worker_count.max(1);
        let capacity = config.channel_capacity();
        let shared = Arc::new(Shared::default());

        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let (tx, rx) = mpsc::channel(capacity);
            let worker = Worker {
                id: worker_id,
                rx,
                store: Arc::clone(&store),
                shared: Arc::clone(&shared),
                batch_size: config.batch_size.max(1),
                buffering: config.buffering,
                pending: Vec::new(),
            };
            senders.push(tx);
            workers.push(tokio::spawn(worker.run()));
        }

        info!(
            workers = worker_count,
            capacity_per_worker = capacity,
            buffering_ms = config.buffering.map(|b| b.as_millis() as u64),
            "Async logging queue started"
        );

        Self {
            config,
            senders: RwLock::new(Some(Arc::new(senders))),
            workers: Mutex::new(workers),
            shared,
            closed: AtomicBool::new(false),
            report: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.counters.snapshot()
    }

    /// Runs with items in flight or failures not yet reported by a flush.
    pub fn tracked_runs(&self) -> usize {
        self.shared.run_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn senders(&self) -> Option<Arc<Vec<mpsc::Sender<Command>>>> {
        self.senders.read().ok()?.clone()
    }

    fn shard(run_id: &str, workers: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        run_id.hash(&mut hasher);
        (hasher.finish() % workers.max(1) as u64) as usize
    }

    fn sender_for(&self, run_id: &str) -> Option<mpsc::Sender<Command>> {
        let senders = self.senders()?;
        senders.get(Self::shard(run_id, senders.len())).cloned()
    }

    /// Enqueue one item for `run_id`.
    ///
    /// Returns once the item is queued; the returned [`RunOperation`] resolves
    /// when the store has acknowledged it or it has permanently failed.
    pub async fn enqueue(&self, run_id: &str, item: LogItem) -> Result<RunOperation, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let sender = self.sender_for(run_id).ok_or(QueueError::Closed)?;

        let (done, rx) = oneshot::channel();
        let command = Command::Item(QueuedItem {
            run_id: run_id.to_string(),
            item,
            done,
        });

        self.shared.record_enqueued(run_id, 1);
        let sent = match self.config.full_policy {
            FullPolicy::FailFast => sender.try_send(command).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => self.full(run_id),
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            }),
            FullPolicy::Block { timeout: limit } => match timeout(limit, sender.send(command)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(QueueError::Closed),
                Err(_) => Err(self.full(run_id)),
            },
        };
        if let Err(e) = sent {
            self.shared.record_rejected(run_id, 1);
            return Err(e);
        }

        self.shared
            .counters
            .items_received
            .fetch_add(1, Ordering::Relaxed);

        let mut operation = RunOperation::new(run_id);
        operation.pending.push(rx);
        Ok(operation)
    }

    /// Enqueue several items for one run, in order.
    ///
    /// Stops at the first item that cannot be queued; items queued before it
    /// stay queued.
    pub async fn enqueue_all(
        &self,
        run_id: &str,
        items: impl IntoIterator<Item = LogItem>,
    ) -> Result<RunOperation, QueueError> {
        let mut operation = RunOperation::new(run_id);
        for item in items {
            operation = operation.merge(self.enqueue(run_id, item).await?);
        }
        Ok(operation)
    }

    fn full(&self, run_id: &str) -> QueueError {
        warn!(run_id = %run_id, "Logging queue is full");
        QueueError::Full {
            run_id: run_id.to_string(),
            capacity: self.config.channel_capacity(),
        }
    }

    /// Wait until every item enqueued for `run_id` before this call has been
    /// acknowledged or has failed.
    ///
    /// Buffered items of the run are sent right away. Returns the first failure
    /// not yet reported by an earlier flush, or `FlushError::Timeout` with the
    /// number of items still pending.
    pub async fn flush(&self, run_id: &str, limit: Duration) -> Result<(), FlushError> {
        let deadline = deadline_after(limit);
        let Some((target, rx)) = self.shared.flush_target(run_id) else {
            return Ok(());
        };

        if let Some(sender) = self.sender_for(run_id) {
            let _ = timeout_at(deadline, sender.send(Command::Flush)).await;
        }

        let pending = wait_for_acks(rx, target, deadline).await;
        if pending > 0 {
            warn!(run_id = %run_id, pending = pending, "Flush timed out");
            return Err(FlushError::Timeout {
                run_id: Some(run_id.to_string()),
                pending,
            });
        }

        match self.shared.take_error(run_id) {
            Some(e) => Err(FlushError::Failed(e)),
            None => Ok(()),
        }
    }

    /// Flush every run known to the queue.
    pub async fn flush_all(&self, limit: Duration) -> Result<(), FlushError> {
        let deadline = deadline_after(limit);
        let targets: Vec<_> = self
            .shared
            .run_ids()
            .into_iter()
            .filter_map(|run_id| {
                self.shared
                    .flush_target(&run_id)
                    .map(|(target, rx)| (run_id, target, rx))
            })
            .collect();

        if let Some(senders) = self.senders() {
            for sender in senders.iter() {
                let _ = timeout_at(deadline, sender.send(Command::Flush)).await;
            }
        }

        let mut pending = 0;
        for (_, target, rx) in &targets {
            pending += wait_for_acks(rx.clone(), *target, deadline).await;
        }
        if pending > 0 {
            warn!(pending = pending, "Flush of all runs timed out");
            return Err(FlushError::Timeout {
                run_id: None,
                pending,
            });
        }

        let mut first_error = None;
        for (run_id, _, _) in &targets {
            if let Some(e) = self.shared.take_error(run_id) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), |e| Err(FlushError::Failed(e)))
    }

    /// Stop accepting items, drain what is queued and stop the workers.
    ///
    /// Workers still busy after `grace` are aborted together with their
    /// in-flight store calls, and their items are reported as dropped. A
    /// dropped item was not acknowledged before the deadline; a request
    /// already on the wire may still have reached the server. Calling `stop`
    /// again returns the first report.
    pub async fn stop(&self, grace: Duration) -> ShutdownReport {
        self.closed.store(true, Ordering::SeqCst);

        let senders = match self.senders.write() {
            Ok(mut senders) => senders.take(),
            Err(_) => None,
        };
        if senders.is_none() {
            return self
                .report
                .lock()
                .ok()
                .and_then(|report| report.clone())
                .unwrap_or_default();
        }
        // Closing the channels lets each worker drain its queue and exit.
        drop(senders);

        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };

        info!(
            workers = workers.len(),
            grace_secs = grace.as_secs_f64(),
            "Stopping async logging queue"
        );

        let deadline = deadline_after(grace);
        let mut timed_out = false;
        for mut handle in workers {
            if !timed_out && timeout_at(deadline, &mut handle).await.is_ok() {
                continue;
            }
            timed_out = true;
            // Dropping the worker also cancels its in-flight store call.
            handle.abort();
            let _ = handle.await;
        }

        let dropped = self.shared.drop_pending();
        self.shared
            .counters
            .items_dropped
            .fetch_add(dropped, Ordering::Relaxed);

        let stats = self.stats();
        let report = ShutdownReport {
            flushed: stats.items_flushed,
            failed: stats.items_failed,
            dropped,
            timed_out,
        };

        if dropped > 0 {
            error!(
                dropped = dropped,
                grace_secs = grace.as_secs_f64(),
                "Async logging queue stopped with unlogged items"
            );
        } else {
            info!(
                flushed = report.flushed,
                failed = report.failed,
                "Async logging queue stopped"
            );
        }

        if let Ok(mut stored) = self.report.lock() {
            *stored = Some(report.clone());
        }
        report
    }
}

/// Wait until `rx` reaches `target`; return how many items are still pending.
async fn wait_for_acks(mut rx: watch::Receiver<u64>, target: u64, deadline: Instant) -> u64 {
    let _ = timeout_at(deadline, async {
        let _ = rx.wait_for(|acked| *acked >= target).await;
    })
    .await;
    let acked = *rx.borrow();
    target.saturating_sub(acked)
}

enum FlushReason {
    Size,
    Time,
    Forced,
    Drain,
}

struct Worker {
    id: usize,
    rx: mpsc::Receiver<Command>,
    store: Arc<dyn TrackingStore>,
    shared: Arc<Shared>,
    batch_size: usize,
    buffering: Option<Duration>,
    pending: Vec<QueuedItem>,
}

impl Worker {
    async fn run(mut self) {
        let mut ticker = self
            .buffering
            .map(|window| interval_at(deadline_after(window), window));

        debug!(worker = self.id, "Logging worker started");

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    match command {
                        Some(Command::Item(item)) => {
                            self.pending.push(item);
                            if self.pending.len() >= self.batch_size {
                                self.dispatch(FlushReason::Size).await;
                            } else if self.buffering.is_none() {
                                self.drain_ready();
                                self.dispatch(FlushReason::Drain).await;
                            }
                        }
                        Some(Command::Flush) => self.dispatch(FlushReason::Forced).await,
                        None => {
                            if !self.pending.is_empty() {
                                info!(
                                    worker = self.id,
                                    remaining = self.pending.len(),
                                    "Queue closed, flushing remaining items"
                                );
                                self.dispatch(FlushReason::Forced).await;
                            }
                            break;
                        }
                    }
                }

                _ = next_tick(&mut ticker) => {
                    self.dispatch(FlushReason::Time).await;
                }
            }
        }

        debug!(worker = self.id, "Logging worker stopped");
    }

    /// Pull whatever is already queued, up to the batch size.
    fn drain_ready(&mut self) {
        while self.pending.len() < self.batch_size {
            match self.rx.try_recv() {
                Ok(Command::Item(item)) => self.pending.push(item),
                Ok(Command::Flush) => {}
                Err(_) => break,
            }
        }
    }

    async fn dispatch(&mut self, reason: FlushReason) {
        if self.pending.is_empty() {
            return;
        }

        let counters = &self.shared.counters;
        match reason {
            FlushReason::Size => counters.size_flushes.fetch_add(1, Ordering::Relaxed),
            FlushReason::Time => counters.time_flushes.fetch_add(1, Ordering::Relaxed),
            FlushReason::Forced => counters.forced_flushes.fetch_add(1, Ordering::Relaxed),
            FlushReason::Drain => 0,
        };

        let items = std::mem::take(&mut self.pending);
        debug!(worker = self.id, items = items.len(), "Flushing logging buffer");

        for (run_id, group) in group_by_run(items) {
            self.log_run(run_id, group).await;
        }
    }

    async fn log_run(&self, run_id: String, items: Vec<QueuedItem>) {
        let count = items.len() as u64;
        let batch = LogBatch::from_items(items.iter().map(|queued| queued.item.clone()));

        let store = Arc::clone(&self.store);
        let task_run_id = run_id.clone();
        let task = tokio::spawn(async move { store.log_batch(&task_run_id, batch).await });
        let _in_flight = AbortOnDrop(task.abort_handle());
        let result = task.await;

        let outcome = match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LoggingError::Store {
                run_id: run_id.clone(),
                message: e.to_string(),
            }),
            Err(join_error) => Err(LoggingError::Panicked {
                run_id: run_id.clone(),
                message: join_error.to_string(),
            }),
        };

        let counters = &self.shared.counters;
        match &outcome {
            Ok(()) => {
                counters.items_flushed.fetch_add(count, Ordering::Relaxed);
                debug!(worker = self.id, run_id = %run_id, items = count, "Logged batch");
            }
            Err(e) => {
                counters.items_failed.fetch_add(count, Ordering::Relaxed);
                error!(worker = self.id, run_id = %run_id, items = count, error = %e, "Failed to log batch");
            }
        }

        self.shared.record_outcome(&run_id, count, &outcome);
        for queued in items {
            let _ = queued.done.send(outcome.clone());
        }
    }
}

/// Aborts the task when dropped, so a cancelled worker takes its store call
/// down with it.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Group items by run, keeping first-seen run order and item order within a run.
fn group_by_run(items: Vec<QueuedItem>) -> Vec<(String, Vec<QueuedItem>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<QueuedItem>)> = Vec::new();
    for item in items {
        match index.get(&item.run_id) {
            Some(&i) => groups[i].1.push(item),
            None => {
                index.insert(item.run_id.clone(), groups.len());
                groups.push((item.run_id.clone(), vec![item]));
            }
        }
    }
    groups
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
