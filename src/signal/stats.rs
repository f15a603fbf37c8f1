//! Per-signal delivery statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, Default)]
pub struct SignalStats {
    pub received: u64,
    pub processed: u64,
    pub dropped: u64,
    pub handler_errors: u64,
    pub last_received: Option<Instant>,
    pub last_processed: Option<Instant>,
}

#[derive(Default)]
pub(crate) struct StatsInner {
    received: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    handler_errors: AtomicU64,
    last_received: Mutex<Option<Instant>>,
    last_processed: Mutex<Option<Instant>>,
}

impl StatsInner {
    pub fn touch_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        *self.last_received.lock() = Some(Instant::now());
    }

    pub fn touch_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        *self.last_processed.lock() = Some(Instant::now());
    }

    pub fn touch_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn touch_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SignalStats {
        SignalStats {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            last_received: *self.last_received.lock(),
            last_processed: *self.last_processed.lock(),
        }
    }
}
