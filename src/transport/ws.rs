use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::metrics::FrameMetrics;

use super::{CloseReason, Transport, TransportEvents, TransportHandle};

enum Outbound {
    Text(String),
    Close,
}

/// WebSocket transport. Each `open` spawns one session task on the runtime
/// captured at construction.
#[derive(Clone)]
pub struct WsTransport {
    runtime: Handle,
    connect_timeout: Duration,
    outbound_buffer: usize,
}

impl WsTransport {
    /// Bind to the runtime of the calling context.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| ClientError::Runtime(format!("no tokio runtime available: {}", e)))?;
        Ok(Self::with_handle(config, runtime))
    }

    pub fn with_handle(config: &ClientConfig, runtime: Handle) -> Self {
        Self {
            runtime,
            connect_timeout: config.connect_timeout(),
            outbound_buffer: config.outbound_buffer.max(1),
        }
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &Url, events: TransportEvents) -> Box<dyn TransportHandle> {
        let (tx, rx) = mpsc::channel(self.outbound_buffer);

        self.runtime.spawn(run_session(
            url.clone(),
            self.connect_timeout,
            rx,
            events,
        ));

        Box::new(WsHandle { outbound: tx })
    }
}

struct WsHandle {
    outbound: mpsc::Sender<Outbound>,
}

impl TransportHandle for WsHandle {
    fn send(&self, text: String) -> Result<()> {
        self.outbound
            .try_send(Outbound::Text(text))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ClientError::Transport("outbound buffer full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => ClientError::NotConnected,
            })
    }

    fn close(&self) {
        // If the buffer is full the close is dropped; the session still ends
        // once this handle (the only sender) is dropped.
        let _ = self.outbound.try_send(Outbound::Close);
    }
}

#[tracing::instrument(
    name = "ws.session",
    skip(url, outbound, events),
    fields(session_id = %events.session_id(), host = url.host_str().unwrap_or_default())
)]
async fn run_session(
    url: Url,
    connect_timeout: Duration,
    mut outbound: mpsc::Receiver<Outbound>,
    events: TransportEvents,
) {
    let connect = tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await;

    let mut stream = match connect {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            events.failed(format!("connection failed: {}", e));
            return;
        }
        Err(_) => {
            events.failed(format!("connection timeout ({:?})", connect_timeout));
            return;
        }
    };

    tracing::debug!("WebSocket handshake complete");
    events.opened();

    loop {
        tokio::select! {
            command = outbound.recv() => {
                match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = stream.send(Message::Text(text.into())).await {
                            events.failed(format!("send failed: {}", e));
                            return;
                        }
                    }
                    // Owner closed us or went away: not an abnormal close
                    Some(Outbound::Close) | None => {
                        let _ = stream.close(None).await;
                        tracing::debug!("WebSocket closed by owner");
                        return;
                    }
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        events.frame(text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => events.frame(text),
                        Err(_) => {
                            FrameMetrics::record_malformed();
                            tracing::warn!(len = data.len(), "Dropping binary frame that is not UTF-8");
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(f) => CloseReason::with_code(f.reason.to_string(), f.code.into()),
                            None => CloseReason::new("server closed connection"),
                        };
                        events.closed(reason);
                        return;
                    }
                    // tungstenite queues the pong reply itself
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        events.failed(format!("WebSocket error: {}", e));
                        return;
                    }
                    None => {
                        events.closed(CloseReason::new("WebSocket stream ended"));
                        return;
                    }
                }
            }
        }
    }
}
