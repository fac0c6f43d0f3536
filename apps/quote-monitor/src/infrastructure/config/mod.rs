//! Configuration Module
//!
//! Environment-driven configuration for the quote monitor.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_CUSTOM_SOURCE_URL, DEFAULT_REST_BASE_URL, DEFAULT_STREAM_URL,
    DisplaySettings, FeedSettings, MonitorConfig, RestSettings, ScheduleSettings, ServerSettings,
    parse_symbol_list,
};
