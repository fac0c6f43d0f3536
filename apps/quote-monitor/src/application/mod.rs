//! Application Layer - Use cases and port definitions.
//!
//! Services here drive the quote pipeline and the portfolio through the
//! ports, never through concrete adapters.

/// Port interfaces for the stream, REST snapshots, events and the clock.
pub mod ports;

/// Ingestion, scheduling, alerting and the monitor facade.
pub mod services;
