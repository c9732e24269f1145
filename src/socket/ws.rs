//! tokio-tungstenite implementation of the [`Transport`] trait.
//!
//! Envelopes travel as text frames; heartbeats use WebSocket ping frames so
//! the relay does not have to understand an application-level ping.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::transport::{Transport, TransportEvent, TransportFactory};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 100;

struct WebSocketTransport {
    sink: Mutex<Option<WsSink>>,
}

impl WebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
        }
    }

    async fn send_message(&self, message: Message) -> Result<(), anyhow::Error> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("socket is closed"))?;
        sink.send(message)
            .await
            .map_err(|e| anyhow::anyhow!("websocket send error: {e}"))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_frame(&self, frame: &str) -> Result<(), anyhow::Error> {
        debug!(target: "Socket", "--> sending frame: {} bytes", frame.len());
        self.send_message(Message::text(frame.to_string())).await
    }

    async fn ping(&self) -> Result<(), anyhow::Error> {
        self.send_message(Message::Ping(Bytes::new())).await
    }

    async fn disconnect(&self) {
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
    }
}

/// Factory dialing the relay endpoint over (optionally TLS) WebSocket.
#[derive(Default)]
pub struct WebSocketTransportFactory;

impl WebSocketTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn create_transport(
        &self,
        endpoint: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        debug!(target: "Socket", "dialing {endpoint}");
        let (ws, _response) = connect_async(endpoint)
            .await
            .map_err(|e| anyhow::anyhow!("websocket connect failed: {e}"))?;
        let (sink, stream) = ws.split();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(read_pump(stream, event_tx.clone()));
        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((Arc::new(WebSocketTransport::new(sink)), event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(target: "Socket", "<-- received frame: {} bytes", text.len());
                if event_tx
                    .send(TransportEvent::FrameReceived(text.to_string()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(target: "Socket", "server closed the connection: {frame:?}");
                let _ = event_tx.send(TransportEvent::Disconnected).await;
                return;
            }
            // Pongs and pings are handled at the protocol layer by
            // tungstenite; binary frames are not part of the envelope schema.
            Some(Ok(other)) => {
                debug!(target: "Socket", "ignoring non-text frame: {other:?}");
            }
            Some(Err(e)) => {
                warn!(target: "Socket", "read error: {e}");
                let _ = event_tx.send(TransportEvent::Disconnected).await;
                return;
            }
            None => {
                let _ = event_tx.send(TransportEvent::Disconnected).await;
                return;
            }
        }
    }
}
