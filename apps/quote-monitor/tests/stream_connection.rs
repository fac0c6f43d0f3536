//! Stream Connection Integration Tests
//!
//! Runs the connection manager against a local WebSocket server speaking
//! the quote protocol: subscriptions on connect, quote delivery, live
//! re-subscription and reconnect after a server-side close.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use quote_monitor::infrastructure::feed::ReconnectConfig;
use quote_monitor::{
    ConnectionConfig, ConnectionManager, ConnectionState, ConnectionStatus, EventHub, FrameCodec,
    Quote, StreamControl,
};

const WAIT: Duration = Duration::from_secs(5);

fn main_frame(symbol: &str, last: &str, reference: &str) -> String {
    let mut parts = vec![String::new(); 102];
    parts[0] = "MAIN".to_string();
    parts[1] = format!("S#{symbol}");
    parts[42] = last.to_string();
    parts[45] = "HOSE".to_string();
    parts[61] = reference.to_string();
    parts[101] = "1717470000000".to_string();
    parts.join("|")
}

/// Accepts connections forever. Each received text is forwarded as
/// `(connection number, text)`. After the first text on a connection the
/// server replies with a heartbeat and one quote; the first connection is
/// then closed by the server.
async fn spawn_server() -> (String, mpsc::UnboundedReceiver<(usize, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut connection = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            let n = connection;
            connection += 1;
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let mut replied = false;
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    let _ = tx.send((n, text.as_str().to_string()));
                    if replied {
                        continue;
                    }
                    replied = true;
                    ws.send(Message::Text("__TICK__".into())).await.unwrap();
                    let frame = main_frame("MBB", "21500", "21000");
                    ws.send(Message::Text(frame.into())).await.unwrap();
                    if n == 0 {
                        let _ = ws.close(None).await;
                        return;
                    }
                }
            });
        }
    });

    (url, rx)
}

fn manager(hub: &Arc<EventHub>) -> (ConnectionManager, mpsc::Receiver<Quote>, CancellationToken) {
    let (tx, rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();
    let config = ConnectionConfig {
        reconnect: ReconnectConfig::fixed(Duration::from_millis(100)),
        ..ConnectionConfig::default()
    };
    let manager = ConnectionManager::new(
        config,
        FrameCodec::default(),
        tx,
        Arc::clone(hub),
        shutdown.clone(),
    );
    (manager, rx, shutdown)
}

async fn next_text(rx: &mut mpsc::UnboundedReceiver<(usize, String)>) -> (usize, String) {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn subscribes_receives_and_reconnects() {
    let (url, mut server_rx) = spawn_server().await;
    let hub = Arc::new(EventHub::default());
    let mut status_rx = hub.status_rx();
    let (manager, mut quotes, shutdown) = manager(&hub);

    manager.set_subscriptions(vec!["MBB".to_string()], false);
    manager.connect(&url);

    let (conn, first) = next_text(&mut server_rx).await;
    assert_eq!(conn, 0);
    let request: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(request["topic"], "stockRealtimeBySymbolsAndBoards");
    assert_eq!(request["variables"]["symbols"][0], "MBB");

    let quote = timeout(WAIT, quotes.recv()).await.unwrap().unwrap();
    let main = match quote {
        Quote::Main(main) => main,
        other => panic!("expected a main-board quote, got {other:?}"),
    };
    assert_eq!(main.symbol, "MBB");
    assert_eq!(main.board, "HOSE");

    // The server closes the first socket; the manager dials again and
    // re-sends the subscriptions.
    let mut reconnected = false;
    while let Ok(Some((conn, text))) = timeout(WAIT, server_rx.recv()).await {
        if conn == 1 && text.contains("stockRealtimeBySymbolsAndBoards") {
            reconnected = true;
            break;
        }
    }
    assert!(reconnected, "no subscription on the second connection");

    let mut statuses = Vec::new();
    while let Ok(update) = status_rx.try_recv() {
        statuses.push(update.status);
    }
    assert_eq!(
        &statuses[..4],
        &[
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
        ]
    );

    shutdown.cancel();
}

#[tokio::test]
async fn subscription_changes_are_sent_while_connected() {
    let (url, mut server_rx) = spawn_server().await;
    let hub = Arc::new(EventHub::default());
    let (manager, mut quotes, shutdown) = manager(&hub);

    manager.set_subscriptions(vec!["MBB".to_string()], false);
    manager.connect(&url);

    // Skip past the first connection, which the server closes.
    let mut second = false;
    while let Ok(Some((conn, _))) = timeout(WAIT, server_rx.recv()).await {
        if conn == 1 {
            second = true;
            break;
        }
    }
    assert!(second);
    while quotes.try_recv().is_ok() {}

    let mut connected = false;
    for _ in 0..50 {
        if manager.state() == ConnectionState::Connected {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(connected);

    manager.set_subscriptions(vec!["MBB".to_string(), "FPT".to_string()], false);
    let (conn, text) = next_text(&mut server_rx).await;
    assert_eq!(conn, 1);
    let request: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(request["variables"]["symbols"][1], "FPT");

    manager.disconnect();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(hub.latest_status().detail, "closed by client");

    shutdown.cancel();
}
