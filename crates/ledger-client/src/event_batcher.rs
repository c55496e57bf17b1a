//! Event Batcher
//!
//! Turns a flood of small audit writes into batches sent to the ledger node.
//! Non-critical events go through a bounded queue and are grouped by size or
//! interval, whichever comes first. Critical events skip the queue and are
//! dispatched immediately as single-entry batches.
//!
//! Every admitted event is accounted for at all times:
//!
//! ```text
//! total_events_queued == total_events_sent + current_queue_depth
//!                        + in_flight_events + total_events_dropped
//! ```
//!
//! The counters are updated independently, so the identity is exact whenever
//! no send or admission is mid-way.

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{LedgerError, Result};
use crate::ledger_events::{event_types, BatchEventEntry, LedgerEventBatch};
use crate::ledger_node::LedgerEventSink;
use crate::resilient_caller::ResilientCaller;
use crate::retry::RetryOptions;
use crate::retry_queue::{BufferLevel, RetryQueue};
use crate::telemetry::{status, LedgerMetrics};

/// Event batcher configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BatcherOptions {
    /// Maximum entries per batch
    pub batch_size: usize,
    /// Maximum time spent accumulating one batch
    pub batch_interval: Duration,
    /// Batches sent concurrently
    pub max_concurrent_batches: usize,
    /// Capacity of the admission queue
    pub max_queue_size: usize,
    /// Event types dispatched immediately (matched case-insensitively)
    pub critical_event_types: HashSet<String>,
    /// Re-queue entries of failed batches
    pub retry_failed_batches: bool,
    /// Capacity of the retry queue, `None` for `max_queue_size`
    pub max_retry_queue_size: Option<usize>,
    /// Times an entry may be re-queued before it is dropped
    pub max_event_retries: u32,
    /// Maximum wait for a send slot
    pub semaphore_timeout: Duration,
}

impl Default for BatcherOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_interval: Duration::from_secs(5),
            max_concurrent_batches: 4,
            max_queue_size: 10_000,
            critical_event_types: [
                event_types::IDENTITY_REVOKED,
                event_types::CREDENTIAL_REVOKED,
                event_types::SECURITY_ALERT,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            retry_failed_batches: true,
            max_retry_queue_size: None,
            max_event_retries: 10,
            semaphore_timeout: Duration::from_secs(30),
        }
    }
}

impl BatcherOptions {
    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }
        if self.batch_interval.is_zero() {
            return Err("batch_interval must be greater than 0".to_string());
        }
        if self.max_concurrent_batches == 0 {
            return Err("max_concurrent_batches must be greater than 0".to_string());
        }
        if self.max_queue_size == 0 {
            return Err("max_queue_size must be greater than 0".to_string());
        }
        if self.max_retry_queue_size == Some(0) {
            return Err("max_retry_queue_size must be greater than 0".to_string());
        }
        if self.semaphore_timeout.is_zero() {
            return Err("semaphore_timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Whether `event_type` bypasses the queue
    pub fn is_critical(&self, event_type: &str) -> bool {
        self.critical_event_types
            .iter()
            .any(|critical| critical.eq_ignore_ascii_case(event_type))
    }

    /// Effective retry queue capacity
    pub fn retry_queue_capacity(&self) -> usize {
        self.max_retry_queue_size.unwrap_or(self.max_queue_size)
    }
}

/// Batcher statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStatistics {
    /// Non-critical events admitted to the queue
    pub total_events_queued: u64,
    /// Non-critical events acknowledged by the node
    pub total_events_sent: u64,
    /// Successful batches
    pub total_batches_sent: u64,
    /// Critical events dispatched
    pub total_critical_events: u64,
    /// Critical events acknowledged
    pub total_critical_sent: u64,
    /// Critical events that failed after retries
    pub total_critical_failed: u64,
    /// Failed batches
    pub total_failed_batches: u64,
    /// Admitted events discarded (failed batches, evictions, retry cap)
    pub total_events_dropped: u64,
    /// Events refused because the queue was full
    pub total_events_rejected: u64,
    /// Events taken from the queues and not yet resolved
    pub in_flight_events: usize,
    /// Queue plus retry queue
    pub current_queue_depth: usize,
    /// Retry queue alone
    pub retry_queue_depth: usize,
    /// Events per successful batch
    pub average_batch_size: f64,
    /// Mean send latency of successful batches
    pub average_latency: Duration,
    /// When the last successful batch completed
    pub last_batch_sent_at: Option<DateTime<Utc>>,
    /// Admitted events by type
    pub queued_by_type: HashMap<String, u64>,
}

#[derive(Default)]
struct BatchCounters {
    queued: AtomicU64,
    sent: AtomicU64,
    batches_sent: AtomicU64,
    critical: AtomicU64,
    critical_sent: AtomicU64,
    critical_failed: AtomicU64,
    failed_batches: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    in_flight: AtomicUsize,
    total_latency_us: AtomicU64,
    /// Milliseconds since the epoch, 0 when nothing was sent
    last_sent_millis: AtomicI64,
}

struct BatcherInner {
    options: BatcherOptions,
    sender: mpsc::Sender<BatchEventEntry>,
    receiver: AsyncMutex<mpsc::Receiver<BatchEventEntry>>,
    retry_queue: RetryQueue,
    send_slots: Arc<Semaphore>,
    caller: Arc<ResilientCaller>,
    sink: Arc<dyn LedgerEventSink>,
    metrics: Option<Arc<LedgerMetrics>>,
    counters: BatchCounters,
    queued_by_type: DashMap<String, u64>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

/// Batched delivery of audit events. Cloning yields another handle to the
/// same batcher.
#[derive(Clone)]
pub struct EventBatcher {
    inner: Arc<BatcherInner>,
}

impl EventBatcher {
    /// Create a new batcher
    pub fn new(
        options: BatcherOptions,
        caller: Arc<ResilientCaller>,
        sink: Arc<dyn LedgerEventSink>,
    ) -> Result<Self> {
        Self::create(options, caller, sink, None)
    }

    fn create(
        options: BatcherOptions,
        caller: Arc<ResilientCaller>,
        sink: Arc<dyn LedgerEventSink>,
        metrics: Option<Arc<LedgerMetrics>>,
    ) -> Result<Self> {
        options.validate().map_err(LedgerError::Config)?;

        info!(
            "Initialized event batcher: batch_size={}, batch_interval={:?}, max_queue_size={}, max_concurrent_batches={}",
            options.batch_size,
            options.batch_interval,
            options.max_queue_size,
            options.max_concurrent_batches
        );

        let (sender, receiver) = mpsc::channel(options.max_queue_size);
        let retry_queue = RetryQueue::new(options.retry_queue_capacity());
        let send_slots = Arc::new(Semaphore::new(options.max_concurrent_batches));

        Ok(Self {
            inner: Arc::new(BatcherInner {
                options,
                sender,
                receiver: AsyncMutex::new(receiver),
                retry_queue,
                send_slots,
                caller,
                sink,
                metrics,
                counters: BatchCounters::default(),
                queued_by_type: DashMap::new(),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Options in use
    pub fn options(&self) -> &BatcherOptions {
        &self.inner.options
    }

    /// Caller guarding batch sends
    pub fn caller(&self) -> &Arc<ResilientCaller> {
        &self.inner.caller
    }

    /// Queue an event without waiting. Returns `false` when the queue is full
    /// or the batcher is closed.
    pub fn queue_event(&self, entry: BatchEventEntry) -> bool {
        if self.is_closed() {
            debug!("Batcher closed, refusing event {}", entry.event_type);
            return false;
        }

        if self.inner.options.is_critical(&entry.event_type) {
            self.dispatch_critical(entry);
            return true;
        }

        let event_type = entry.event_type.clone();
        match self.inner.sender.try_send(entry) {
            Ok(()) => {
                self.on_admitted(&event_type);
                true
            }
            Err(TrySendError::Full(entry)) => {
                self.inner.counters.rejected.fetch_add(1, Ordering::Relaxed);
                if let Some(ref m) = self.inner.metrics {
                    m.record_event_rejected(&event_type);
                }
                warn!(
                    "Event queue is full, dropping event: event_type={}, entity_id={}",
                    entry.event_type, entry.entity_id
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queue an event, waiting for space. Returns `false` if `cancel` fires or
    /// the batcher is closed first; nothing is queued in that case.
    pub async fn queue_event_async(
        &self,
        entry: BatchEventEntry,
        cancel: &CancellationToken,
    ) -> bool {
        if self.is_closed() {
            return false;
        }

        if self.inner.options.is_critical(&entry.event_type) {
            self.dispatch_critical(entry);
            return true;
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = self.inner.shutdown.cancelled() => return false,
            permit = self.inner.sender.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        let event_type = entry.event_type.clone();
        permit.send(entry);
        self.on_admitted(&event_type);
        true
    }

    fn on_admitted(&self, event_type: &str) {
        self.inner.counters.queued.fetch_add(1, Ordering::Relaxed);
        self.inner
            .queued_by_type
            .entry(event_type.to_string())
            .and_modify(|v| *v += 1)
            .or_insert(1);
        if let Some(ref m) = self.inner.metrics {
            m.record_event_queued(event_type);
        }
    }

    fn dispatch_critical(&self, mut entry: BatchEventEntry) {
        entry.is_critical = true;
        self.inner.counters.critical.fetch_add(1, Ordering::Relaxed);

        match Handle::try_current() {
            Ok(handle) => {
                let inner = self.inner.clone();
                handle.spawn(async move {
                    inner.send_critical(entry).await;
                });
            }
            Err(_) => {
                self.inner
                    .counters
                    .critical_failed
                    .fetch_add(1, Ordering::Relaxed);
                error!(
                    "No async runtime available, critical event lost: event_type={}, entity_id={}",
                    entry.event_type, entry.entity_id
                );
            }
        }
    }

    /// Drain the queue and the retry queue, sending batches of at most
    /// `batch_size`. Returns the number of events acknowledged.
    pub async fn flush(&self, cancel: &CancellationToken) -> usize {
        let mut entries = Vec::new();
        {
            let mut receiver = tokio::select! {
                guard = self.inner.receiver.lock() => guard,
                _ = cancel.cancelled() => return 0,
            };
            let pending = self.channel_len();
            while entries.len() < pending {
                match receiver.try_recv() {
                    Ok(entry) => {
                        self.inner.counters.in_flight.fetch_add(1, Ordering::AcqRel);
                        entries.push(entry);
                    }
                    Err(_) => break,
                }
            }
        }

        let retries = self.inner.retry_queue.drain_all();
        self.inner
            .counters
            .in_flight
            .fetch_add(retries.len(), Ordering::AcqRel);
        entries.extend(retries);

        if entries.is_empty() {
            return 0;
        }

        info!("Flushing {} events", entries.len());

        let batch_size = self.inner.options.batch_size;
        let mut sent = 0;
        let mut remaining = entries.into_iter().peekable();

        while remaining.peek().is_some() {
            if cancel.is_cancelled() {
                let unsent: Vec<_> = remaining.collect();
                info!("Flush cancelled, returning {} events to the retry queue", unsent.len());
                self.inner.restore(unsent);
                break;
            }

            let chunk: Vec<_> = remaining.by_ref().take(batch_size).collect();
            sent += self.send_batch(chunk).await;
        }

        sent
    }

    /// Form one batch and send it. Returns the number of events acknowledged.
    pub async fn process_batch(&self, cancel: &CancellationToken) -> usize {
        let batch = self.next_batch(cancel).await;
        if batch.is_empty() {
            return 0;
        }
        self.send_batch(batch).await
    }

    /// Accumulate entries until `batch_size` or `batch_interval`, then top up
    /// from the retry queue.
    pub(crate) async fn next_batch(&self, cancel: &CancellationToken) -> Vec<BatchEventEntry> {
        let options = &self.inner.options;
        let mut batch = Vec::with_capacity(options.batch_size);

        {
            let mut receiver = tokio::select! {
                guard = self.inner.receiver.lock() => guard,
                _ = cancel.cancelled() => return batch,
            };
            let deadline = Instant::now() + options.batch_interval;

            while batch.len() < options.batch_size {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    entry = receiver.recv() => match entry {
                        Some(entry) => {
                            self.inner.counters.in_flight.fetch_add(1, Ordering::AcqRel);
                            batch.push(entry);
                        }
                        None => break,
                    },
                    _ = sleep_until(deadline) => break,
                }
            }
        }

        if batch.len() < options.batch_size {
            let retries = self
                .inner
                .retry_queue
                .pop_up_to(options.batch_size - batch.len());
            self.inner
                .counters
                .in_flight
                .fetch_add(retries.len(), Ordering::AcqRel);
            batch.extend(retries);
        }

        batch
    }

    /// Wait for a send slot, bounded by `semaphore_timeout`
    pub(crate) async fn acquire_send_slot(&self) -> Option<OwnedSemaphorePermit> {
        match timeout(
            self.inner.options.semaphore_timeout,
            self.inner.send_slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Some(permit),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!(
                    "Timeout waiting {:?} for a batch send slot",
                    self.inner.options.semaphore_timeout
                );
                None
            }
        }
    }

    /// Send a formed batch through a send slot
    pub(crate) async fn send_batch(&self, entries: Vec<BatchEventEntry>) -> usize {
        if entries.is_empty() {
            return 0;
        }
        match self.acquire_send_slot().await {
            Some(permit) => self.send_with_permit(entries, permit).await,
            None => {
                self.inner.fail_batch(entries, Duration::ZERO);
                0
            }
        }
    }

    /// Send a batch holding an already acquired slot
    pub(crate) async fn send_with_permit(
        &self,
        entries: Vec<BatchEventEntry>,
        permit: OwnedSemaphorePermit,
    ) -> usize {
        let sent = self.inner.send_entries(entries).await;
        drop(permit);
        sent
    }

    /// Resolve a batch that could not get a send slot
    pub(crate) fn fail_unsent(&self, entries: Vec<BatchEventEntry>) {
        self.inner.fail_batch(entries, Duration::ZERO);
    }

    /// Return a formed but unsent batch to the retry queue
    pub(crate) fn restore_unsent(&self, entries: Vec<BatchEventEntry>) {
        if !entries.is_empty() {
            debug!("Returning {} unsent events to the retry queue", entries.len());
            self.inner.restore(entries);
        }
    }

    pub(crate) fn metrics(&self) -> Option<&Arc<LedgerMetrics>> {
        self.inner.metrics.as_ref()
    }

    /// Stop admitting events. Producers waiting for space return `false`.
    /// Entries already queued remain flushable.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            info!("Event batcher closed, depth at close: {}", self.queue_depth());
            self.inner.shutdown.cancel();
        }
    }

    /// Whether [`close`](Self::close) was called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn channel_len(&self) -> usize {
        self.inner.sender.max_capacity() - self.inner.sender.capacity()
    }

    /// Entries waiting in the queue and the retry queue
    pub fn queue_depth(&self) -> usize {
        self.channel_len() + self.inner.retry_queue.len()
    }

    /// Entries waiting in the admission queue
    pub fn pending_depth(&self) -> usize {
        self.channel_len()
    }

    /// Entries waiting in the retry queue
    pub fn retry_queue_depth(&self) -> usize {
        self.inner.retry_queue.len()
    }

    /// Utilization level of the admission queue
    pub fn queue_level(&self) -> BufferLevel {
        BufferLevel::from_usage(self.channel_len(), self.inner.options.max_queue_size)
    }

    /// Current statistics
    pub fn statistics(&self) -> BatchStatistics {
        let counters = &self.inner.counters;
        let total_batches = counters.batches_sent.load(Ordering::Relaxed);
        let total_sent = counters.sent.load(Ordering::Relaxed);
        let total_latency_us = counters.total_latency_us.load(Ordering::Relaxed);
        let last_sent_millis = counters.last_sent_millis.load(Ordering::Relaxed);

        let (average_batch_size, average_latency) = if total_batches > 0 {
            (
                total_sent as f64 / total_batches as f64,
                Duration::from_micros(total_latency_us / total_batches),
            )
        } else {
            (0.0, Duration::ZERO)
        };

        let last_batch_sent_at = if last_sent_millis > 0 {
            Utc.timestamp_millis_opt(last_sent_millis).single()
        } else {
            None
        };

        BatchStatistics {
            total_events_queued: counters.queued.load(Ordering::Relaxed),
            total_events_sent: total_sent,
            total_batches_sent: total_batches,
            total_critical_events: counters.critical.load(Ordering::Relaxed),
            total_critical_sent: counters.critical_sent.load(Ordering::Relaxed),
            total_critical_failed: counters.critical_failed.load(Ordering::Relaxed),
            total_failed_batches: counters.failed_batches.load(Ordering::Relaxed),
            total_events_dropped: counters.dropped.load(Ordering::Relaxed),
            total_events_rejected: counters.rejected.load(Ordering::Relaxed),
            in_flight_events: counters.in_flight.load(Ordering::Acquire),
            current_queue_depth: self.queue_depth(),
            retry_queue_depth: self.inner.retry_queue.len(),
            average_batch_size,
            average_latency,
            last_batch_sent_at,
            queued_by_type: self
                .inner
                .queued_by_type
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}

impl BatcherInner {
    /// Submit one batch through the resilient caller and resolve its entries
    async fn send_entries(&self, entries: Vec<BatchEventEntry>) -> usize {
        let size = entries.len();
        if size == 0 {
            return 0;
        }

        let batch = Arc::new(LedgerEventBatch::new(entries));
        let started = Instant::now();
        debug!("Sending batch {} of {} events", batch.batch_id, size);

        let sink = self.sink.as_ref();
        // In-flight sends finish even when the driver is stopping
        let result = self
            .caller
            .execute_named(
                "submit_batch",
                |batch: Arc<LedgerEventBatch>, token: CancellationToken| {
                    submit_batch(sink, batch, token)
                },
                batch.clone(),
                &CancellationToken::new(),
            )
            .await;
        let latency = started.elapsed();

        if result.success {
            let counters = &self.counters;
            counters.sent.fetch_add(size as u64, Ordering::Relaxed);
            counters.batches_sent.fetch_add(1, Ordering::Relaxed);
            counters
                .total_latency_us
                .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
            counters
                .last_sent_millis
                .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
            counters.in_flight.fetch_sub(size, Ordering::AcqRel);

            if let Some(ref m) = self.metrics {
                m.record_batch(size as u64, latency.as_secs_f64() * 1000.0, status::SUCCESS);
                m.record_events_sent(size as u64, status::SUCCESS);
            }

            info!(
                "Batch sent successfully: count={}, latency={:?}, attempts={}",
                size, latency, result.attempts
            );
            size
        } else {
            warn!(
                "Batch of {} events failed after {} attempts: {}",
                size,
                result.attempts,
                result.error.as_deref().unwrap_or("unknown error")
            );
            let entries = Arc::try_unwrap(batch)
                .unwrap_or_else(|shared| (*shared).clone())
                .into_entries();
            if result.is_circuit_open() && self.options.retry_failed_batches {
                self.defer_batch(entries, latency);
            } else {
                self.fail_batch(entries, latency);
            }
            0
        }
    }

    /// Re-queue a batch the open circuit kept from reaching the node.
    /// Entries keep their retry count.
    fn defer_batch(&self, entries: Vec<BatchEventEntry>, latency: Duration) {
        let size = entries.len();
        self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);

        if let Some(ref m) = self.metrics {
            m.record_batch(size as u64, latency.as_secs_f64() * 1000.0, status::CIRCUIT_OPEN);
        }

        debug!("Circuit open, deferring {} events", size);
        self.restore(entries);
    }

    /// Count a failed batch and re-queue or drop its entries
    fn fail_batch(&self, entries: Vec<BatchEventEntry>, latency: Duration) {
        let size = entries.len();
        let counters = &self.counters;
        counters.failed_batches.fetch_add(1, Ordering::Relaxed);

        if let Some(ref m) = self.metrics {
            m.record_batch(size as u64, latency.as_secs_f64() * 1000.0, status::FAILED);
            m.record_events_sent(size as u64, status::FAILED);
        }

        if !self.options.retry_failed_batches {
            counters.dropped.fetch_add(size as u64, Ordering::Relaxed);
            counters.in_flight.fetch_sub(size, Ordering::AcqRel);
            warn!("Discarded {} events of failed batch", size);
            return;
        }

        let max_retries = self.options.max_event_retries;
        let (mut requeue, exhausted): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| entry.retry_count < max_retries);

        for entry in &mut requeue {
            entry.retry_count += 1;
        }

        if !exhausted.is_empty() {
            warn!(
                "Dropping {} events that failed {} times",
                exhausted.len(),
                max_retries
            );
        }

        let requeued = requeue.len();
        let evicted = self.retry_queue.push_all(requeue);
        counters
            .dropped
            .fetch_add((exhausted.len() + evicted) as u64, Ordering::Relaxed);
        counters.in_flight.fetch_sub(size, Ordering::AcqRel);

        debug!("Re-queued {} events for retry", requeued);
    }

    /// Put taken entries back without counting a failure
    fn restore(&self, entries: Vec<BatchEventEntry>) {
        let size = entries.len();
        let evicted = self.retry_queue.push_all(entries);
        self.counters
            .dropped
            .fetch_add(evicted as u64, Ordering::Relaxed);
        self.counters.in_flight.fetch_sub(size, Ordering::AcqRel);
    }

    /// Send a critical event as a single-entry batch
    async fn send_critical(&self, entry: BatchEventEntry) {
        debug!(
            "Sending critical event immediately: event_type={}, entity_id={}",
            entry.event_type, entry.entity_id
        );

        let event_type = entry.event_type.clone();
        let entity_id = entry.entity_id.clone();
        let batch = Arc::new(LedgerEventBatch::new(vec![entry]));
        let sink = self.sink.as_ref();

        let result = self
            .caller
            .execute_named(
                "submit_critical",
                |batch: Arc<LedgerEventBatch>, token: CancellationToken| {
                    submit_batch(sink, batch, token)
                },
                batch,
                &CancellationToken::new(),
            )
            .await;

        if result.success {
            self.counters.critical_sent.fetch_add(1, Ordering::Relaxed);
            if let Some(ref m) = self.metrics {
                m.record_events_sent(1, status::SUCCESS);
            }
            info!(
                "Critical event sent: event_type={}, entity_id={}",
                event_type, entity_id
            );
        } else {
            self.counters.critical_failed.fetch_add(1, Ordering::Relaxed);
            if let Some(ref m) = self.metrics {
                m.record_events_sent(1, status::FAILED);
            }
            warn!(
                "Failed to send critical event: event_type={}, error={}",
                event_type,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

/// Submit a batch and require every entry to be acknowledged
async fn submit_batch(
    sink: &dyn LedgerEventSink,
    batch: Arc<LedgerEventBatch>,
    cancel: CancellationToken,
) -> Result<()> {
    let receipt = sink.submit_batch(&batch, &cancel).await?;
    if receipt.accepted < batch.size() {
        return Err(LedgerError::PartialBatch {
            accepted: receipt.accepted,
            total: batch.size(),
        });
    }
    Ok(())
}

/// Builder for event batcher
pub struct EventBatcherBuilder {
    options: BatcherOptions,
    retry_options: RetryOptions,
    caller: Option<Arc<ResilientCaller>>,
    metrics: Option<Arc<LedgerMetrics>>,
}

impl EventBatcherBuilder {
    /// Create new builder
    pub fn new() -> Self {
        Self {
            options: BatcherOptions::default(),
            retry_options: RetryOptions::default(),
            caller: None,
            metrics: None,
        }
    }

    /// Replace all batcher options
    pub fn options(mut self, options: BatcherOptions) -> Self {
        self.options = options;
        self
    }

    /// Set batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.options.batch_size = size;
        self
    }

    /// Set batch interval
    pub fn batch_interval(mut self, interval: Duration) -> Self {
        self.options.batch_interval = interval;
        self
    }

    /// Set queue capacity
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.options.max_queue_size = size;
        self
    }

    /// Set concurrent batch limit
    pub fn max_concurrent_batches(mut self, count: usize) -> Self {
        self.options.max_concurrent_batches = count;
        self
    }

    /// Replace the critical event types
    pub fn critical_event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.critical_event_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable re-queueing failed batches
    pub fn retry_failed_batches(mut self, enable: bool) -> Self {
        self.options.retry_failed_batches = enable;
        self
    }

    /// Retry options for a caller owned by this batcher
    pub fn retry_options(mut self, options: RetryOptions) -> Self {
        self.retry_options = options;
        self
    }

    /// Share an existing caller (and its circuit) instead
    pub fn caller(mut self, caller: Arc<ResilientCaller>) -> Self {
        self.caller = Some(caller);
        self
    }

    /// Attach metrics
    pub fn metrics(mut self, metrics: Arc<LedgerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the batcher
    pub fn build(self, sink: Arc<dyn LedgerEventSink>) -> Result<EventBatcher> {
        let caller = match self.caller {
            Some(caller) => caller,
            None => {
                self.retry_options.validate().map_err(LedgerError::Config)?;
                let mut caller = ResilientCaller::new(self.retry_options);
                if let Some(ref metrics) = self.metrics {
                    caller = caller.with_metrics(metrics.clone());
                }
                Arc::new(caller)
            }
        };

        EventBatcher::create(self.options, caller, sink, self.metrics)
    }
}

impl Default for EventBatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
