//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the ports defined in the application layer,
//! plus configuration and observability.

/// Streaming feed: wire messages, frame codec and the socket manager.
pub mod feed;

/// REST snapshot fetcher.
pub mod rest;

/// Broadcast channels for quote batches, status and alerts.
pub mod broadcast;

/// Configuration and dependency injection.
pub mod config;

/// Health check and read-only HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
