//! Stream Liveness
//!
//! The server interleaves `__TICK__` markers with quote frames. Every
//! inbound frame refreshes the liveness clock; with an idle timeout
//! configured, a silent socket is treated like an unexpected close.

use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// Liveness settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LivenessConfig {
    /// Maximum silence before the socket is dropped; `None` disables it.
    pub idle_timeout: Option<Duration>,
}

impl LivenessConfig {
    /// Config from an idle timeout where zero disables the check.
    #[must_use]
    pub const fn from_idle_timeout(timeout: Duration) -> Self {
        if timeout.is_zero() {
            Self { idle_timeout: None }
        } else {
            Self {
                idle_timeout: Some(timeout),
            }
        }
    }
}

/// Per-connection liveness bookkeeping.
#[derive(Debug)]
pub struct LivenessState {
    last_frame: RwLock<Instant>,
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessState {
    /// Fresh state; the clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_frame: RwLock::new(Instant::now()),
        }
    }

    /// Any inbound frame, heartbeats included.
    pub fn record_frame(&self) {
        *self.last_frame.write() = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_frame.read().elapsed()
    }

    /// Resolves once the socket has been silent for `config.idle_timeout`.
    /// Never resolves when the timeout is disabled.
    pub async fn expired(&self, config: LivenessConfig) {
        let Some(timeout) = config.idle_timeout else {
            return std::future::pending().await;
        };
        loop {
            let deadline = *self.last_frame.read() + timeout;
            tokio::time::sleep_until(deadline).await;
            if self.idle_for() >= timeout {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_disables_check() {
        assert_eq!(LivenessConfig::from_idle_timeout(Duration::ZERO).idle_timeout, None);
        assert_eq!(
            LivenessConfig::from_idle_timeout(Duration::from_secs(30)).idle_timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn frames_reset_idle_time() {
        let state = LivenessState::new();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(state.idle_for(), Duration::from_secs(4));
        state.record_frame();
        assert_eq!(state.idle_for(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_silence() {
        let state = LivenessState::new();
        let config = LivenessConfig::from_idle_timeout(Duration::from_secs(10));

        let start = Instant::now();
        state.expired(config).await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn frames_push_the_deadline_back() {
        let state = std::sync::Arc::new(LivenessState::new());
        let config = LivenessConfig::from_idle_timeout(Duration::from_secs(10));

        let feeder = std::sync::Arc::clone(&state);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(6)).await;
            feeder.record_frame();
        });

        let start = Instant::now();
        state.expired(config).await;
        assert!(start.elapsed() >= Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_never_expires() {
        let state = LivenessState::new();
        let result = tokio::time::timeout(
            Duration::from_secs(3600),
            state.expired(LivenessConfig::default()),
        )
        .await;
        assert!(result.is_err());
    }
}
