//! Stream Connection Manager
//!
//! Owns the quote socket and drives it through
//! `Disconnected -> Connecting -> Connected`. Each `connect` starts a new
//! session task; the session redials after an unexpected close using the
//! reconnect policy. `disconnect` cancels the session, which also cancels a
//! pending redial.
//!
//! Inbound frames are decoded here. Quotes are forwarded to the coalescer
//! channel and heartbeats only refresh liveness. Status transitions go to
//! the event hub.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, FrameCodec, ParseError};
use super::heartbeat::{LivenessConfig, LivenessState};
use super::messages::SubscriptionSet;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::StreamControl;
use crate::domain::market::{ConnectionStatus, Quote};
use crate::infrastructure::broadcast::SharedEventHub;
use crate::infrastructure::config::FeedSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Why a session ended.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// WebSocket failure (handshake, I/O or protocol).
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Subscription could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Server closed the socket.
    #[error("connection closed by server")]
    Closed,

    /// No frame within the idle timeout.
    #[error("no frame received for {0:?}")]
    IdleTimeout(std::time::Duration),
}

impl ConnectionError {
    /// True when the failure should be reported as an `error` status before
    /// the `disconnected` one.
    #[must_use]
    pub const fn is_error_status(&self) -> bool {
        matches!(self, Self::WebSocket(_) | Self::Codec(_))
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open.
    Connected,
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Redial timing.
    pub reconnect: ReconnectConfig,
    /// Idle detection.
    pub liveness: LivenessConfig,
    /// Buffer of outbound text frames per session.
    pub outbound_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            liveness: LivenessConfig::default(),
            outbound_capacity: 32,
        }
    }
}

impl ConnectionConfig {
    /// Config from feed settings.
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self {
            reconnect: ReconnectConfig::from_feed_settings(settings),
            liveness: LivenessConfig::from_idle_timeout(settings.idle_timeout),
            outbound_capacity: 32,
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

struct Session {
    id: u64,
    cancel: CancellationToken,
    outbound: Option<mpsc::Sender<String>>,
}

struct Inner {
    config: ConnectionConfig,
    codec: FrameCodec,
    quote_tx: mpsc::Sender<Quote>,
    hub: SharedEventHub,
    shutdown: CancellationToken,
    state: RwLock<ConnectionState>,
    session: Mutex<Option<Session>>,
    session_ids: AtomicU64,
    subscriptions: RwLock<SubscriptionSet>,
}

/// Handle to the streaming connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.inner.state.read())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager. Decoded quotes are sent on `quote_tx`; sessions
    /// stop when `shutdown` is cancelled.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        codec: FrameCodec,
        quote_tx: mpsc::Sender<Quote>,
        hub: SharedEventHub,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                codec,
                quote_tx,
                hub,
                shutdown,
                state: RwLock::new(ConnectionState::Disconnected),
                session: Mutex::new(None),
                session_ids: AtomicU64::new(0),
                subscriptions: RwLock::new(SubscriptionSet::default()),
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Current subscription set.
    #[must_use]
    pub fn subscriptions(&self) -> SubscriptionSet {
        self.inner.subscriptions.read().clone()
    }
}

impl StreamControl for ConnectionManager {
    fn connect(&self, url: &str) {
        let id = self.inner.session_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = self.inner.shutdown.child_token();
        let previous = self.inner.session.lock().replace(Session {
            id,
            cancel: cancel.clone(),
            outbound: None,
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        tracing::info!(url, session = id, "Starting stream session");
        let inner = Arc::clone(&self.inner);
        let url = url.to_string();
        tokio::spawn(async move {
            inner.run_session(id, url, cancel).await;
        });
    }

    fn disconnect(&self) {
        let mut current = self.inner.session.lock();
        let Some(session) = current.take() else {
            return;
        };
        session.cancel.cancel();
        *self.inner.state.write() = ConnectionState::Disconnected;
        metrics::set_stream_connected(false);
        self.inner
            .hub
            .set_status(ConnectionStatus::Disconnected, "closed by client");
        drop(current);
        tracing::info!(session = session.id, "Stream disconnected");
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_subscriptions(&self, symbols: Vec<String>, include_indices: bool) {
        let set = SubscriptionSet {
            symbols,
            include_indices,
        };
        *self.inner.subscriptions.write() = set.clone();

        if !self.is_connected() {
            return;
        }
        let Some(outbound) = self
            .inner
            .session
            .lock()
            .as_ref()
            .and_then(|s| s.outbound.clone())
        else {
            return;
        };
        for request in set.requests() {
            match self.inner.codec.encode_subscription(&request) {
                Ok(text) => {
                    if outbound.try_send(text).is_err() {
                        tracing::warn!(topic = %request.topic, "Outbound buffer full, subscription dropped");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to encode subscription"),
            }
        }
        tracing::debug!(symbols = set.symbols.len(), "Subscriptions re-sent");
    }
}

impl Inner {
    /// Publish a state change for session `id`. The session lock is held
    /// until the status is out, so a concurrent `disconnect` either runs
    /// first (and the change is skipped) or has the last word.
    fn transition(&self, id: u64, state: ConnectionState, status: ConnectionStatus, detail: &str) {
        let current = self.session.lock();
        if !current.as_ref().is_some_and(|s| s.id == id) {
            return;
        }
        *self.state.write() = state;
        metrics::set_stream_connected(state == ConnectionState::Connected);
        self.hub.set_status(status, detail);
        drop(current);
    }

    fn set_outbound(&self, id: u64, outbound: Option<mpsc::Sender<String>>) {
        if let Some(session) = self.session.lock().as_mut().filter(|s| s.id == id) {
            session.outbound = outbound;
        }
    }

    async fn run_session(&self, id: u64, url: String, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if cancel.is_cancelled() {
                return;
            }
            self.transition(
                id,
                ConnectionState::Connecting,
                ConnectionStatus::Connecting,
                "connecting",
            );

            let result = self.connect_and_run(id, &url, &cancel, &mut policy).await;
            self.set_outbound(id, None);

            let error = match result {
                Ok(()) => return,
                Err(e) => e,
            };
            if cancel.is_cancelled() {
                return;
            }

            if error.is_error_status() {
                tracing::warn!(error = %error, session = id, "Stream error");
                self.transition(
                    id,
                    ConnectionState::Disconnected,
                    ConnectionStatus::Error,
                    &error.to_string(),
                );
            } else {
                tracing::info!(reason = %error, session = id, "Stream closed");
            }
            self.transition(
                id,
                ConnectionState::Disconnected,
                ConnectionStatus::Disconnected,
                "connection lost",
            );

            let delay = policy.next_delay();
            metrics::record_reconnect_attempt();
            tracing::info!(
                attempt = policy.failures(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to quote stream"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Runs one socket until it closes. `Ok` means the session was cancelled.
    async fn connect_and_run(
        &self,
        id: u64,
        url: &str,
        cancel: &CancellationToken,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), ConnectionError> {
        let (ws_stream, _response) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(url) => result?,
        };
        let (mut write, mut read) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(self.config.outbound_capacity);
        policy.reset();
        self.set_outbound(id, Some(outbound_tx));
        self.transition(
            id,
            ConnectionState::Connected,
            ConnectionStatus::Connected,
            "connected",
        );

        let requests = self.subscriptions.read().requests();
        for request in requests {
            let text = self.codec.encode_subscription(&request)?;
            tracing::debug!(topic = %request.topic, "Sending subscription");
            write.send(Message::Text(text.into())).await?;
        }

        let liveness = LivenessState::new();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                () = liveness.expired(self.config.liveness) => {
                    return Err(ConnectionError::IdleTimeout(liveness.idle_for()));
                }
                Some(text) = outbound_rx.recv() => {
                    write.send(Message::Text(text.into())).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text, &liveness).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            liveness.record_frame();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(ConnectionError::Closed);
                        }
                        Some(Ok(_)) => {
                            liveness.record_frame();
                        }
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str, liveness: &LivenessState) {
        liveness.record_frame();
        if FrameCodec::is_acknowledgement(text) {
            tracing::debug!("Subscription acknowledged");
            return;
        }

        match self.codec.parse(text) {
            Ok(Quote::Heartbeat) => {
                metrics::record_frame("heartbeat");
                tracing::trace!("Heartbeat");
            }
            Ok(quote) => {
                metrics::record_frame(quote.kind());
                if self.quote_tx.send(quote).await.is_err() {
                    tracing::debug!("Quote channel closed, frame discarded");
                }
            }
            Err(e @ ParseError::MalformedFrame { .. }) => {
                metrics::record_frame_dropped("malformed");
                tracing::warn!(error = %e, "Dropping malformed frame");
            }
            Err(ParseError::Unrecognized) => {
                metrics::record_frame_dropped("unrecognized");
                tracing::trace!(len = text.len(), "Ignoring unrecognized frame");
            }
        }
    }
}
