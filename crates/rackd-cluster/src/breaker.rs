//! Retry breaker with exponential backoff
//!
//! A [`Breaker`] decides whether a failed operation should be retried and blocks
//! for the backoff interval before the retry. It gives up once `max_retries` is
//! exceeded or when shutdown is requested through a [`StopHandle`].

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Name used in log messages
    pub name: String,
    /// First backoff interval in milliseconds
    pub base_interval_ms: u64,
    /// Retries allowed before giving up; `None` retries forever
    pub max_retries: Option<u32>,
    /// Multiplier applied to the interval after each retry
    pub scale: f64,
    /// Upper bound for the interval in milliseconds
    pub max_interval_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: "cluster".to_string(),
            base_interval_ms: 1_000,
            max_retries: Some(20),
            scale: 2.0,
            max_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Default)]
struct Shutdown {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Requests shutdown of a breaker, waking any pending wait
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    shutdown: Arc<Shutdown>,
}

impl StopHandle {
    pub fn stop(&self) {
        let mut stopped = self
            .shutdown
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.shutdown.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self
            .shutdown
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Retry/backoff state shared across attempts of one operation
#[derive(Debug)]
pub struct Breaker {
    config: BreakerConfig,
    retries: u32,
    interval: Duration,
    stop: StopHandle,
}

impl Default for Breaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl Breaker {
    pub fn new(config: BreakerConfig) -> Self {
        let mut breaker = Self {
            config,
            retries: 0,
            interval: Duration::ZERO,
            stop: StopHandle::default(),
        };
        breaker.interval = breaker.base_interval();
        breaker
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Retries taken since the last reset
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Interval the next wait will block for
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether shutdown has not been requested
    pub fn running(&self) -> bool {
        !self.stop.is_stopped()
    }

    /// Clear retry state after a successful operation
    pub fn reset(&mut self) {
        self.retries = 0;
        self.interval = self.base_interval();
    }

    /// Block for the backoff interval. Returns `false` when the caller should give
    /// up: retries are exhausted or shutdown was requested.
    pub fn wait(&mut self, reason: &str) -> bool {
        if !self.running() {
            return false;
        }
        if let Some(max) = self.config.max_retries {
            if self.retries >= max {
                error!(
                    breaker = %self.config.name,
                    retries = self.retries,
                    reason = %reason,
                    "Exceeded maximum retries"
                );
                return false;
            }
        }
        self.retries += 1;
        warn!(
            breaker = %self.config.name,
            attempt = self.retries,
            max = ?self.config.max_retries,
            delay_ms = self.interval.as_millis() as u64,
            reason = %reason,
            "Retrying after failure"
        );

        if !self.sleep(self.interval) {
            return false;
        }

        self.interval = self.next_interval();
        true
    }

    /// Scaled interval, capped at `max_interval_ms`
    fn next_interval(&self) -> Duration {
        let max_interval = Duration::from_millis(self.config.max_interval_ms);
        let scale = self.config.scale.max(1.0);
        let secs = self.interval.as_secs_f64() * scale;
        // also catches infinite and NaN products
        if !(secs < max_interval.as_secs_f64()) {
            return max_interval;
        }
        Duration::try_from_secs_f64(secs).map_or(max_interval, |d| d.min(max_interval))
    }

    fn base_interval(&self) -> Duration {
        Duration::from_millis(self.config.base_interval_ms.min(self.config.max_interval_ms))
    }

    /// Sleep unless stopped first; returns whether still running
    fn sleep(&self, duration: Duration) -> bool {
        // No deadline when the interval cannot be represented; only stop ends the wait
        let deadline = Instant::now().checked_add(duration);
        let shutdown = &self.stop.shutdown;
        let mut stopped = shutdown
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    deadline - now
                }
                None => duration,
            };
            stopped = shutdown
                .cond
                .wait_timeout(stopped, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        !*stopped
    }
}
