//! WebSocket transport tests against a loopback server

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

use trade_notify_client::config::{ClientConfig, ReconnectConfig};
use trade_notify_client::{ClientMessage, ConnectionState, Event, NotificationClient};

const WAIT: Duration = Duration::from_secs(5);

/// Accepts connections, records request URIs, and plays a fixed script:
/// the first connection sends one event and closes, later ones send one
/// event and forward whatever the client sends.
async fn spawn_server() -> (String, Arc<Mutex<Vec<String>>>, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let uris = Arc::new(Mutex::new(Vec::new()));
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let recorded = uris.clone();
    tokio::spawn(async move {
        let mut served = 0u32;
        while let Ok((stream, _)) = listener.accept().await {
            served += 1;
            let recorded = recorded.clone();
            let inbound_tx = inbound_tx.clone();
            let id = served;

            tokio::spawn(async move {
                let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    recorded.lock().push(req.uri().to_string());
                    Ok(resp)
                };
                let mut ws = accept_hdr_async(stream, callback).await.unwrap();

                let frame = format!(
                    r#"{{"type":"claim_status","id":"RD-{}","status":"approved"}}"#,
                    id
                );
                ws.send(Message::Text(frame.into())).await.unwrap();

                if id == 1 {
                    let _ = ws.close(None).await;
                    return;
                }

                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Text(text) = message {
                        let _ = inbound_tx.send(text.as_str().to_string());
                    }
                }
            });
        }
    });

    (format!("ws://{}", addr), uris, inbound_rx)
}

fn config(endpoint: String) -> ClientConfig {
    ClientConfig {
        endpoint,
        heartbeat_interval: 0,
        connect_timeout: 2,
        reconnect: ReconnectConfig {
            base_delay_ms: 10,
            max_delay_ms: 100,
            ..ReconnectConfig::default()
        },
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_receives_events_and_reconnects_after_server_close() {
    let (endpoint, uris, mut inbound) = spawn_server().await;
    let client = NotificationClient::new(config(endpoint)).unwrap();

    let (events_tx, mut events) = mpsc::unbounded_channel();
    client.subscribe("claim_status", move |event: &Event| {
        let _ = events_tx.send(event.clone());
    });

    client.connect("secret-token");

    let first = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(first.get("id").and_then(|v| v.as_str()), Some("RD-1"));

    // Server closes the first connection; the client comes back on its own
    let second = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(second.get("id").and_then(|v| v.as_str()), Some("RD-2"));

    let mut states = client.watch_state();
    timeout(WAIT, states.wait_for(|state| state.is_connected()))
        .await
        .unwrap()
        .unwrap();

    client
        .send(&ClientMessage::subscribe(vec!["claim_status".to_string()]))
        .unwrap();
    let sent = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(sent, r#"{"type":"subscribe","channels":["claim_status"]}"#);

    let uris = uris.lock().clone();
    assert_eq!(uris.len(), 2);
    for uri in &uris {
        assert_eq!(uri, "/ws?token=secret-token");
    }

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_unreachable_endpoint_schedules_reconnect() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = config(format!("ws://{}", addr));
    config.reconnect.base_delay_ms = 1000;
    config.reconnect.max_delay_ms = 60_000;
    let client = NotificationClient::new(config).unwrap();
    let mut states = client.watch_state();
    client.connect("secret-token");

    let state = timeout(WAIT, states.wait_for(|state| state.is_reconnect_pending()))
        .await
        .unwrap()
        .map(|state| *state)
        .unwrap();
    assert!(matches!(
        state,
        ConnectionState::ReconnectPending { attempt: 1, .. }
    ));

    client.disconnect();
}
