//! Connection status reported to consumers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Streaming connection state as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Dialing the stream.
    Connecting,
    /// Socket open.
    Connected,
    /// No socket, either by request, while polling, or awaiting reconnect.
    Disconnected,
    /// The socket reported an error.
    Error,
}

impl ConnectionStatus {
    /// Lower-case label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status transition with a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// New status.
    pub status: ConnectionStatus,
    /// Why, for display.
    pub detail: String,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    /// Update stamped now.
    #[must_use]
    pub fn new(status: ConnectionStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}

impl Default for StatusUpdate {
    fn default() -> Self {
        Self::new(ConnectionStatus::Disconnected, "not started")
    }
}
