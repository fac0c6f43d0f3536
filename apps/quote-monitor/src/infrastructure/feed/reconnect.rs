//! Reconnect Policy
//!
//! Delay before re-dialing the quote stream after an unexpected close. Every
//! close waits the same fixed delay (3 s unless configured).

use std::time::Duration;

use crate::infrastructure::config::FeedSettings;

/// Reconnect timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay after each close.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(3000))
    }
}

impl ReconnectConfig {
    /// Fixed delay between attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// Timing from feed settings.
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self::fixed(settings.reconnect_delay)
    }
}

/// Tracks consecutive failures and yields the next delay.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    failures: u32,
}

impl ReconnectPolicy {
    /// Policy with no failures recorded.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Record a close and return how long to wait before re-dialing.
    pub const fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.config.delay
    }

    /// Forget failures after a successful open.
    pub const fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive closes since the last successful open.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}
