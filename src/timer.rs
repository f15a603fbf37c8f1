//! Shared reconnection backoff calculator.
//!
//! Used by both `TcpClient` and `MqttClient` to space out reconnect
//! attempts. Each calls `next_delay()` which multiplies the previous delay
//! by `factor`, clamps to `max`, applies uniform jitter, and bumps the
//! attempt counter; `reset()` is called after a successful connection.

use std::time::Duration;

use rand::Rng;

/// Configuration for exponential backoff with jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max: Duration::from_secs(30),
            factor: 1.5,
            jitter_ratio: 0.2,
        }
    }
}

/// The attempt counter resets to 0 after this many calls to avoid any
/// risk of overflow in long-lived, never-reconnecting-successfully
/// sessions.
const ATTEMPT_HARD_CAP: u32 = 30;

/// Tracks reconnect attempts and computes the next delay.
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffConfig,
    attempt: u32,
    current: Duration,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.base,
            config,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Compute the next delay and advance internal state.
    pub fn next_delay(&mut self) -> Duration {
        if self.attempt > ATTEMPT_HARD_CAP {
            self.attempt = 0;
            self.current = self.config.base;
        }

        if self.attempt > 0 {
            let scaled = self.current.as_secs_f64() * self.config.factor;
            let clamped = scaled.min(self.config.max.as_secs_f64());
            self.current = Duration::from_secs_f64(clamped);
        }

        self.attempt += 1;
        jitter(self.current, self.config.jitter_ratio)
    }

    /// Reset attempt count and current delay to their initial values,
    /// returning the delay that would be used for the first attempt.
    pub fn reset(&mut self) -> Duration {
        self.attempt = 0;
        self.current = self.config.base;
        jitter(self.current, self.config.jitter_ratio)
    }
}

fn jitter(base: Duration, ratio: f64) -> Duration {
    let lo = 1.0 - ratio;
    let hi = 1.0 + ratio;
    let factor = if lo < hi {
        rand::thread_rng().gen_range(lo..=hi)
    } else {
        1.0
    };
    Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
}
