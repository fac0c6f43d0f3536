#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Monitor - Real-time Portfolio Tracker
//!
//! Keeps a live per-symbol quote map for a personal watchlist and portfolio,
//! fed by a streaming socket during trading hours and by REST polling the
//! rest of the time, and derives profit / loss and alerts from it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Quote model and pure calculations
//!   - `market`: quotes, quote store, trading session rules, connection status
//!   - `portfolio`: following, holdings, orders, P/L and statistics
//!   - `alert`: price and change alerts
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: stream control, REST snapshots, event sink, clock
//!   - `services`: writer, coalescer, source scheduler, alerts, monitor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: streaming socket, frame codec, reconnect and liveness
//!   - `rest`: REST snapshot fetcher
//!   - `broadcast`: channel-based event distribution
//!   - `config`: configuration from the environment
//!   - `health`: health check and read-only HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! stream socket ─► codec ─► coalescer ─┐
//!                                      ├─► writer ─► QuoteStore ─► EventHub
//! REST fetcher ◄── scheduler ──────────┘                │
//!                                                       └─► P/L, alerts
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Quote model and pure calculations.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::alert::{Alert, AlertCondition, AlertNotification};
pub use domain::market::{
    ConnectionStatus, DataSource, IndexQuote, MainQuote, Quote, QuoteBatch, QuoteStore,
    StatusUpdate, TradingCalendar,
};
pub use domain::portfolio::{
    Order, OrderSide, Portfolio, PortfolioError, PortfolioStats, PortfolioSummary, PositionRow,
};

// Application services
pub use application::ports::{Clock, EventSink, QuoteSnapshotSource, StreamControl, SystemClock};
pub use application::services::{
    DataSourceScheduler, Monitor, MonitorError, MonitorOptions, MonitorSettings, SchedulerDeps,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, MonitorConfig};

// Adapters (for integration tests)
pub use infrastructure::broadcast::{EventHub, EventHubConfig, SharedEventHub};
pub use infrastructure::feed::{ConnectionConfig, ConnectionManager, ConnectionState, FrameCodec};
pub use infrastructure::rest::{RestError, RestFetcher};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
