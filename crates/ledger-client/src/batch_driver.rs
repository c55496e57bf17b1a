//! Background Batch Driver
//!
//! Long-lived task that keeps forming batches from an [`EventBatcher`] and
//! sends them concurrently, at most `max_concurrent_batches` at a time.

use futures::FutureExt;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::event_batcher::EventBatcher;

/// What a driver did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchDriverSummary {
    /// Batches handed to send tasks
    pub batches_dispatched: u64,
    /// Batches acknowledged by the node
    pub batches_sent: u64,
    /// Batches that failed, including those that never got a send slot
    pub batches_failed: u64,
    /// Events acknowledged by the node
    pub events_sent: u64,
}

impl BatchDriverSummary {
    fn record_send(&mut self, result: Result<usize, JoinError>) {
        match result {
            Ok(0) => self.batches_failed += 1,
            Ok(sent) => {
                self.batches_sent += 1;
                self.events_sent += sent as u64;
            }
            Err(e) => {
                self.batches_failed += 1;
                error!("Batch send task failed: {}", e);
            }
        }
    }
}

/// Handle to a running batch driver
pub struct BatchDriver {
    handle: JoinHandle<BatchDriverSummary>,
    cancel: CancellationToken,
}

impl BatchDriver {
    /// Spawn the driver on the current runtime. It runs until `cancel` fires.
    pub fn spawn(batcher: EventBatcher, cancel: CancellationToken) -> Self {
        let handle = tokio::spawn(run(batcher, cancel.clone()));
        Self { handle, cancel }
    }

    /// Token stopping this driver
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the driver task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop forming batches and wait for in-flight sends
    pub async fn shutdown(self) -> BatchDriverSummary {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the driver to exit
    pub async fn join(self) -> BatchDriverSummary {
        match self.handle.await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Batch driver task failed: {}", e);
                BatchDriverSummary::default()
            }
        }
    }
}

async fn run(batcher: EventBatcher, cancel: CancellationToken) -> BatchDriverSummary {
    info!(
        "Batch driver started: batch_size={}, batch_interval={:?}",
        batcher.options().batch_size,
        batcher.options().batch_interval
    );
    if let Some(m) = batcher.metrics() {
        m.increment_active_drivers();
    }

    let mut sends: JoinSet<usize> = JoinSet::new();
    let mut summary = BatchDriverSummary::default();

    while !cancel.is_cancelled() {
        while let Some(Some(result)) = sends.join_next().now_or_never() {
            summary.record_send(result);
        }

        let batch = batcher.next_batch(&cancel).await;
        if batch.is_empty() {
            continue;
        }
        if cancel.is_cancelled() {
            batcher.restore_unsent(batch);
            break;
        }

        let permit = tokio::select! {
            permit = batcher.acquire_send_slot() => permit,
            _ = cancel.cancelled() => {
                batcher.restore_unsent(batch);
                break;
            }
        };

        match permit {
            Some(permit) => {
                debug!("Dispatching batch of {} events", batch.len());
                summary.batches_dispatched += 1;
                let sender = batcher.clone();
                sends.spawn(async move { sender.send_with_permit(batch, permit).await });
            }
            None => {
                summary.batches_failed += 1;
                batcher.fail_unsent(batch);
            }
        }
    }

    info!(
        "Batch driver stopping, waiting for {} in-flight sends",
        sends.len()
    );
    while let Some(result) = sends.join_next().await {
        summary.record_send(result);
    }

    if let Some(m) = batcher.metrics() {
        m.decrement_active_drivers();
    }
    info!(
        "Batch driver stopped: {} batches sent, {} failed, {} events sent",
        summary.batches_sent, summary.batches_failed, summary.events_sent
    );

    summary
}
