//! Domain Layer - Quote model, portfolio and alert rules.
//!
//! Pure types and calculations with no I/O. Everything here can be tested
//! without a runtime.

/// Canonical quote model, quote store and trading session rules.
pub mod market;

/// Positions and profit / loss calculation.
pub mod portfolio;

/// Price alerts.
pub mod alert;
