//! Monitor Configuration Settings
//!
//! Configuration types for the quote monitor, loaded from environment variables.

use std::time::Duration;

use crate::application::services::{CoalescerConfig, MonitorOptions, MonitorSettings, SchedulerConfig};
use crate::domain::market::TradingCalendar;

/// Default public quote stream.
pub const DEFAULT_STREAM_URL: &str = "wss://iboard-pushstream.ssi.com.vn/realtime";

/// Default REST quote endpoint.
pub const DEFAULT_REST_BASE_URL: &str = "https://api2.simplize.vn/api/historical/quote";

/// Default self-hosted stream.
pub const DEFAULT_CUSTOM_SOURCE_URL: &str = "ws://localhost:8025/websocket/stockdata";

/// Streaming feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Public quote stream URL.
    pub stream_url: String,
    /// Self-hosted stream URL.
    pub custom_source_url: String,
    /// Delay before re-dialing after an unexpected close.
    pub reconnect_delay: Duration,
    /// Silence before the socket is dropped (zero = never).
    pub idle_timeout: Duration,
    /// Debounce window for streamed updates.
    pub coalesce_window: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            custom_source_url: DEFAULT_CUSTOM_SOURCE_URL.to_string(),
            reconnect_delay: Duration::from_millis(3000),
            idle_timeout: Duration::ZERO,
            coalesce_window: Duration::from_millis(50),
        }
    }
}

/// REST snapshot settings.
#[derive(Debug, Clone)]
pub struct RestSettings {
    /// Base URL; the symbol is appended as a path segment.
    pub base_url: String,
    /// Requests in flight per batch.
    pub max_concurrency: usize,
    /// Pause between batches.
    pub batch_pause: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REST_BASE_URL.to_string(),
            max_concurrency: 10,
            batch_pause: Duration::from_millis(100),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Timer settings for the scheduler and the alert loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
    /// REST poll period outside trading hours.
    pub poll_interval: Duration,
    /// REST poll period during the lunch break.
    pub lunch_poll_interval: Duration,
    /// Period of the source re-evaluation.
    pub source_check_interval: Duration,
    /// Period of alert evaluation.
    pub alert_interval: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            lunch_poll_interval: Duration::from_secs(30),
            source_check_interval: Duration::from_secs(30),
            alert_interval: Duration::from_secs(5),
        }
    }
}

/// User-facing toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySettings {
    /// Subscribe to and fetch index quotes.
    pub display_index: bool,
    /// Show summed book volumes.
    pub display_volume: bool,
    /// Include sell lines in the aggregate diff.
    pub sell_watching: bool,
    /// Use the self-hosted stream around the clock.
    pub use_custom_source: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            display_index: true,
            display_volume: false,
            sell_watching: true,
            use_custom_source: false,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health/metrics/read-API port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete monitor configuration.
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    /// Streaming feed.
    pub feed: FeedSettings,
    /// REST snapshots.
    pub rest: RestSettings,
    /// Timers.
    pub schedule: ScheduleSettings,
    /// Toggles.
    pub display: DisplaySettings,
    /// HTTP server.
    pub server: ServerSettings,
    /// Exchange local time.
    pub calendar: TradingCalendar,
    /// Symbols followed at startup.
    pub watchlist: Vec<String>,
}

impl MonitorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL setting is empty or has the wrong scheme.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL setting is empty or has the wrong scheme.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let feed_defaults = FeedSettings::default();
        let feed = FeedSettings {
            stream_url: env.websocket_url("QUOTE_STREAM_URL", &feed_defaults.stream_url)?,
            custom_source_url: env
                .websocket_url("QUOTE_CUSTOM_SOURCE_URL", &feed_defaults.custom_source_url)?,
            reconnect_delay: env
                .duration_millis("QUOTE_RECONNECT_DELAY_MS", feed_defaults.reconnect_delay),
            idle_timeout: env
                .duration_secs("QUOTE_STREAM_IDLE_TIMEOUT_SECS", feed_defaults.idle_timeout),
            coalesce_window: env
                .duration_millis("QUOTE_COALESCE_WINDOW_MS", feed_defaults.coalesce_window),
        };

        let rest_defaults = RestSettings::default();
        let rest = RestSettings {
            base_url: env.http_url("QUOTE_REST_BASE_URL", &rest_defaults.base_url)?,
            max_concurrency: env
                .parse("QUOTE_REST_MAX_CONCURRENCY", rest_defaults.max_concurrency)
                .max(1),
            batch_pause: env.duration_millis("QUOTE_REST_BATCH_PAUSE_MS", rest_defaults.batch_pause),
            timeout: env.duration_secs("QUOTE_REST_TIMEOUT_SECS", rest_defaults.timeout),
        };

        let schedule_defaults = ScheduleSettings::default();
        let schedule = ScheduleSettings {
            poll_interval: env
                .duration_secs("QUOTE_POLL_INTERVAL_SECS", schedule_defaults.poll_interval),
            lunch_poll_interval: env.duration_secs(
                "QUOTE_LUNCH_POLL_INTERVAL_SECS",
                schedule_defaults.lunch_poll_interval,
            ),
            source_check_interval: env.duration_secs(
                "QUOTE_SOURCE_CHECK_INTERVAL_SECS",
                schedule_defaults.source_check_interval,
            ),
            alert_interval: env
                .duration_secs("QUOTE_ALERT_INTERVAL_SECS", schedule_defaults.alert_interval),
        };

        let display_defaults = DisplaySettings::default();
        let display = DisplaySettings {
            display_index: env.flag("QUOTE_DISPLAY_INDEX", display_defaults.display_index),
            display_volume: env.flag("QUOTE_DISPLAY_VOLUME", display_defaults.display_volume),
            sell_watching: env.flag("QUOTE_SELL_WATCHING", display_defaults.sell_watching),
            use_custom_source: env
                .flag("QUOTE_USE_CUSTOM_SOURCE", display_defaults.use_custom_source),
        };

        let server = ServerSettings {
            health_port: env.parse(
                "QUOTE_MONITOR_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let calendar = TradingCalendar::from_hours(env.parse(
            "QUOTE_EXCHANGE_UTC_OFFSET_HOURS",
            TradingCalendar::DEFAULT_UTC_OFFSET_HOURS,
        ));

        let watchlist = lookup("QUOTE_WATCHLIST")
            .map(|list| parse_symbol_list(&list))
            .unwrap_or_default();

        Ok(Self {
            feed,
            rest,
            schedule,
            display,
            server,
            calendar,
            watchlist,
        })
    }

    /// URL the stream should use given the custom-source toggle.
    #[must_use]
    pub fn active_stream_url(&self) -> &str {
        if self.display.use_custom_source {
            &self.feed.custom_source_url
        } else {
            &self.feed.stream_url
        }
    }

    /// Initial user settings for the monitor.
    #[must_use]
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            display_index: self.display.display_index,
            display_volume: self.display.display_volume,
            sell_watching: self.display.sell_watching,
            use_custom_source: self.display.use_custom_source,
            stream_url: self.feed.stream_url.clone(),
            custom_source_url: self.feed.custom_source_url.clone(),
        }
    }

    /// Pipeline timing for the monitor.
    #[must_use]
    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            calendar: self.calendar,
            scheduler: SchedulerConfig {
                poll_interval: self.schedule.poll_interval,
                lunch_poll_interval: self.schedule.lunch_poll_interval,
                check_interval: self.schedule.source_check_interval,
            },
            coalescer: CoalescerConfig::with_window(self.feed.coalesce_window),
            alert_interval: self.schedule.alert_interval,
            ..MonitorOptions::default()
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// URL with an unsupported scheme.
    #[error("environment variable {key} must be a {expected} URL, got {value:?}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
        /// Accepted schemes.
        expected: &'static str,
    },
}

/// Split a comma-separated symbol list, upper-casing and dropping blanks.
#[must_use]
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn url(
        &self,
        key: &str,
        default: &str,
        schemes: &[&str],
        expected: &'static str,
    ) -> Result<String, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(default.to_string());
        };
        let value = value.trim().to_string();
        if value.is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        if !schemes.iter().any(|scheme| value.starts_with(scheme)) {
            return Err(ConfigError::InvalidUrl {
                key: key.to_string(),
                value,
                expected,
            });
        }
        Ok(value)
    }

    fn websocket_url(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        self.url(key, default, &["ws://", "wss://"], "ws(s)")
    }

    fn http_url(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        self.url(key, default, &["http://", "https://"], "http(s)")
    }
}
