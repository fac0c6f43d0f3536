//! Quote Stream Feed
//!
//! WebSocket client for the exchange quote stream: frame decoding,
//! subscription requests, liveness tracking, reconnect timing and the
//! connection manager that ties them together.

pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use codec::{CodecError, FrameCodec, ParseError};
pub use connection::{ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState};
pub use heartbeat::{LivenessConfig, LivenessState};
pub use messages::{SubscriptionRequest, SubscriptionSet, SubscriptionVariables};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
