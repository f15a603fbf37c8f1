//! Per-remote-address connection and message rate limiting.
//!
//! Two independent quotas: maximum concurrent connections (checked at
//! accept, decremented on disconnect) and maximum messages per minute
//! (sliding window, pruned lazily on each check). Disabled by default.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::client::RemoteState;

const MESSAGE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_connections_per_ip: i64,
    pub max_messages_per_minute: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_connections_per_ip: 10,
            max_messages_per_minute: 100,
        }
    }
}

pub(crate) struct RateLimiter {
    config: RateLimitConfig,
    connections: DashMap<IpAddr, RemoteState>,
    timestamps: DashMap<IpAddr, Mutex<VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            connections: DashMap::new(),
            timestamps: DashMap::new(),
        }
    }

    /// Called at accept time. Returns `true` if the connection is allowed
    /// and reserves a slot (caller must call `release_connection` on
    /// disconnect).
    pub fn try_acquire_connection(&self, addr: IpAddr) -> bool {
        if !self.config.enabled {
            return true;
        }
        let entry = self.connections.entry(addr).or_default();
        let current = entry.active_connections.load(Ordering::Relaxed);
        if current >= self.config.max_connections_per_ip {
            return false;
        }
        entry.active_connections.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn release_connection(&self, addr: IpAddr) {
        if let Some(entry) = self.connections.get(&addr) {
            entry
                .active_connections
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                    Some((v - 1).max(0))
                })
                .ok();
        }
    }

    /// Sliding-window message quota check: prunes timestamps older than
    /// 60s, then admits the message if under quota.
    pub fn can_send_message(&self, addr: IpAddr) -> bool {
        if !self.config.enabled {
            return true;
        }
        let now = Instant::now();
        let entry = self.timestamps.entry(addr).or_default();
        let mut queue = entry.lock();
        while let Some(front) = queue.front() {
            if now.duration_since(*front) > MESSAGE_WINDOW {
                queue.pop_front();
            } else {
                break;
            }
        }
        if queue.len() >= self.config.max_messages_per_minute {
            return false;
        }
        queue.push_back(now);
        true
    }

    pub fn active_connections(&self, addr: IpAddr) -> i64 {
        self.connections
            .get(&addr)
            .map(|e| e.active_connections.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn connection_quota_rejects_kplus_one() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: true,
            max_connections_per_ip: 2,
            max_messages_per_minute: 100,
        });
        assert!(limiter.try_acquire_connection(addr()));
        assert!(limiter.try_acquire_connection(addr()));
        assert!(!limiter.try_acquire_connection(addr()));
        limiter.release_connection(addr());
        assert!(limiter.try_acquire_connection(addr()));
    }

    #[test]
    fn message_quota_drops_exactly_one_over_limit() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: true,
            max_connections_per_ip: 100,
            max_messages_per_minute: 3,
        });
        let mut allowed = 0;
        let mut dropped = 0;
        for _ in 0..4 {
            if limiter.can_send_message(addr()) {
                allowed += 1;
            } else {
                dropped += 1;
            }
        }
        assert_eq!(allowed, 3);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        for _ in 0..1000 {
            assert!(limiter.try_acquire_connection(addr()));
            assert!(limiter.can_send_message(addr()));
        }
    }
}
