//! Connection statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct ConnectionStats {
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub last_connected_time: Option<Instant>,
    pub last_activity_time: Option<Instant>,
}

pub(crate) struct StatsInner {
    pub total_bytes_sent: AtomicU64,
    pub total_bytes_received: AtomicU64,
    pub connection_attempts: AtomicU64,
    pub successful_connections: AtomicU64,
    pub failed_connections: AtomicU64,
    pub last_connected_time: Mutex<Option<Instant>>,
    pub last_activity_time: Mutex<Option<Instant>>,
}

impl Default for StatsInner {
    fn default() -> Self {
        Self {
            total_bytes_sent: AtomicU64::new(0),
            total_bytes_received: AtomicU64::new(0),
            connection_attempts: AtomicU64::new(0),
            successful_connections: AtomicU64::new(0),
            failed_connections: AtomicU64::new(0),
            last_connected_time: Mutex::new(None),
            last_activity_time: Mutex::new(None),
        }
    }
}

impl StatsInner {
    pub fn touch_activity(&self) {
        *self.last_activity_time.lock() = Some(Instant::now());
    }

    pub fn record_connected(&self) {
        self.successful_connections.fetch_add(1, Ordering::Relaxed);
        *self.last_connected_time.lock() = Some(Instant::now());
    }

    pub fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            total_bytes_sent: self.total_bytes_sent.load(Ordering::Relaxed),
            total_bytes_received: self.total_bytes_received.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            successful_connections: self.successful_connections.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            last_connected_time: *self.last_connected_time.lock(),
            last_activity_time: *self.last_activity_time.lock(),
        }
    }

    pub fn reset(&self) {
        self.total_bytes_sent.store(0, Ordering::Relaxed);
        self.total_bytes_received.store(0, Ordering::Relaxed);
        self.connection_attempts.store(0, Ordering::Relaxed);
        self.successful_connections.store(0, Ordering::Relaxed);
        self.failed_connections.store(0, Ordering::Relaxed);
        *self.last_connected_time.lock() = None;
        *self.last_activity_time.lock() = None;
    }
}
