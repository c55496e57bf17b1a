//! Retry Queue and Buffer Levels
//!
//! Entries of failed batches wait here until the next batch is formed. The
//! queue is bounded; on overflow the oldest entries are evicted.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::ledger_events::BatchEventEntry;

/// Utilization (percent) at which a buffer is reported as warning
pub const WARNING_THRESHOLD_PERCENT: f64 = 80.0;

/// Utilization (percent) at which a buffer is reported as critical
pub const CRITICAL_THRESHOLD_PERCENT: f64 = 95.0;

/// Buffer utilization level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLevel {
    /// Buffer usage is normal
    Normal,
    /// Buffer usage is high (warning threshold exceeded)
    Warning,
    /// Buffer usage is critical
    Critical,
    /// Buffer is full
    Full,
}

impl BufferLevel {
    /// Classify `current` entries against `capacity`
    pub fn from_usage(current: usize, capacity: usize) -> Self {
        if capacity == 0 || current >= capacity {
            return BufferLevel::Full;
        }

        let utilization = (current as f64 / capacity as f64) * 100.0;
        if utilization >= CRITICAL_THRESHOLD_PERCENT {
            BufferLevel::Critical
        } else if utilization >= WARNING_THRESHOLD_PERCENT {
            BufferLevel::Warning
        } else {
            BufferLevel::Normal
        }
    }

    /// Get level name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Full => "full",
        }
    }
}

/// Bounded FIFO of entries awaiting another send
pub struct RetryQueue {
    capacity: usize,
    entries: Mutex<VecDeque<BatchEventEntry>>,
    /// Mirrors `entries.len()` for lock-free reads
    len: AtomicUsize,
    evicted: AtomicU64,
}

impl RetryQueue {
    /// Create a retry queue holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Append entries, evicting the oldest on overflow. Returns the number of
    /// entries evicted.
    pub fn push_all(&self, batch: Vec<BatchEventEntry>) -> usize {
        let mut entries = self.entries.lock();
        entries.extend(batch);

        let mut evicted = 0;
        while entries.len() > self.capacity {
            entries.pop_front();
            evicted += 1;
        }
        self.len.store(entries.len(), Ordering::Release);
        drop(entries);

        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            warn!("Retry queue full, evicted {} oldest entries", evicted);
        }
        evicted
    }

    /// Take up to `max` entries from the front
    pub fn pop_up_to(&self, max: usize) -> Vec<BatchEventEntry> {
        if max == 0 || self.is_empty() {
            return Vec::new();
        }

        let mut entries = self.entries.lock();
        let take = max.min(entries.len());
        let popped: Vec<_> = entries.drain(..take).collect();
        self.len.store(entries.len(), Ordering::Release);

        if !popped.is_empty() {
            debug!("Took {} entries from retry queue", popped.len());
        }
        popped
    }

    /// Take every entry
    pub fn drain_all(&self) -> Vec<BatchEventEntry> {
        let mut entries = self.entries.lock();
        self.len.store(0, Ordering::Release);
        entries.drain(..).collect()
    }

    /// Current number of entries
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries evicted since creation
    pub fn total_evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Current utilization level
    pub fn level(&self) -> BufferLevel {
        BufferLevel::from_usage(self.len(), self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<BatchEventEntry> {
        (0..n)
            .map(|i| BatchEventEntry::new("T", "test", "E", i.to_string()))
            .collect()
    }

    #[test]
    fn test_buffer_level_calculation() {
        assert_eq!(BufferLevel::from_usage(0, 100), BufferLevel::Normal);
        assert_eq!(BufferLevel::from_usage(79, 100), BufferLevel::Normal);
        assert_eq!(BufferLevel::from_usage(80, 100), BufferLevel::Warning);
        assert_eq!(BufferLevel::from_usage(95, 100), BufferLevel::Critical);
        assert_eq!(BufferLevel::from_usage(100, 100), BufferLevel::Full);
        assert_eq!(BufferLevel::from_usage(0, 0), BufferLevel::Full);
    }

    #[test]
    fn test_level_names() {
        assert_eq!(BufferLevel::Normal.name(), "normal");
        assert_eq!(BufferLevel::Warning.name(), "warning");
        assert_eq!(BufferLevel::Critical.name(), "critical");
        assert_eq!(BufferLevel::Full.name(), "full");
    }

    #[test]
    fn test_push_and_pop_fifo() {
        let queue = RetryQueue::new(10);
        assert_eq!(queue.push_all(entries(4)), 0);
        assert_eq!(queue.len(), 4);

        let first = queue.pop_up_to(3);
        assert_eq!(
            first.iter().map(|e| e.entity_id.as_str()).collect::<Vec<_>>(),
            vec!["0", "1", "2"]
        );
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_up_to(5).len(), 1);
        assert!(queue.is_empty());
        assert!(queue.pop_up_to(5).is_empty());
    }

    #[test]
    fn test_drop_oldest_on_overflow() {
        let queue = RetryQueue::new(3);
        queue.push_all(entries(2));
        let evicted = queue.push_all(entries(3));

        assert_eq!(evicted, 2);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.total_evicted(), 2);

        let remaining = queue.drain_all();
        assert_eq!(
            remaining.iter().map(|e| e.entity_id.as_str()).collect::<Vec<_>>(),
            vec!["0", "1", "2"]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_level_tracks_usage() {
        let queue = RetryQueue::new(10);
        assert_eq!(queue.level(), BufferLevel::Normal);
        queue.push_all(entries(8));
        assert_eq!(queue.level(), BufferLevel::Warning);
        queue.push_all(entries(2));
        assert_eq!(queue.level(), BufferLevel::Full);
    }
}
