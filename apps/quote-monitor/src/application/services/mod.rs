//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `QuoteWriter`: single writer into the quote store
//! - `UpdateCoalescer`: debounces stream frames into batches
//! - `DataSourceScheduler`: switches between streaming and REST polling
//! - `AlertService`: periodic alert evaluation
//! - `Monitor`: owns the portfolio and wires the pipeline together

pub mod alerts;
pub mod coalescer;
pub mod ingest;
pub mod monitor;
pub mod scheduler;

pub use alerts::{AlertService, SharedAlerts};
pub use coalescer::{CoalescerConfig, UpdateCoalescer};
pub use ingest::{IngestBatch, QuoteWriter};
pub use monitor::{Monitor, MonitorError, MonitorOptions, MonitorSettings};
pub use scheduler::{
    CLOSED_POLLING_DETAIL, DataSourceScheduler, LUNCH_POLLING_DETAIL, SchedulerConfig,
    SchedulerDeps, SourceTarget,
};
