//! Reconnect pacing for the push WebSocket.
//!
//! [`Backoff`] tracks the delay between connection attempts: it grows
//! geometrically on every failure, is capped at
//! [`ReconnectConfig::max_delay`], and resets once a session is
//! established.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Wait after the first failed attempt.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Delay state for one listener.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let current = config.initial_delay.min(config.max_delay);
        Self {
            config,
            current,
            failures: 0,
        }
    }

    /// Record a failed attempt and return how long to wait before the
    /// next one.
    pub fn fail(&mut self) -> Duration {
        let wait = self.current;
        self.failures += 1;
        let grown = self.current.as_secs_f64() * self.config.multiplier.max(1.0);
        self.current = Duration::from_secs_f64(grown).min(self.config.max_delay);
        wait
    }

    /// A session was established; the next failure waits the initial delay.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay.min(self.config.max_delay);
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
