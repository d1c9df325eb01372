/// Tokio-based WebSocket transport implementation for verto-rust
///
/// This crate provides a concrete implementation of the Transport trait
/// using tokio-tungstenite. Frames are opaque text; the signaling layer
/// owns the envelope format.
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// An event produced by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text frame has been received from the server.
    TextReceived(String),
    /// A non-fatal transport error was observed.
    Error(String),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a text frame to the server.
    async fn send(&self, text: &str) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);

    /// Whether the underlying socket is still open.
    fn is_connected(&self) -> bool;
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with a stream of events.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Tokio WebSocket transport
pub struct TokioWebSocketTransport {
    ws_sink: Mutex<Option<WsSink>>,
    is_connected: Arc<AtomicBool>,
}

impl TokioWebSocketTransport {
    fn new(sink: WsSink, is_connected: Arc<AtomicBool>) -> Self {
        Self {
            ws_sink: Mutex::new(Some(sink)),
            is_connected,
        }
    }
}

#[async_trait]
impl Transport for TokioWebSocketTransport {
    async fn send(&self, text: &str) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        debug!("--> Sending frame: {} bytes", text.len());
        sink.send(Message::text(text))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {}", e))?;
        Ok(())
    }

    async fn disconnect(&self) {
        if self.is_connected.swap(false, Ordering::SeqCst) {
            if let Some(mut sink) = self.ws_sink.lock().await.take() {
                if let Err(e) = sink.close().await {
                    debug!("WebSocket close error: {e}");
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Relaxed)
    }
}

/// Factory for creating Tokio WebSocket transports to a fixed signaling URL.
pub struct TokioWebSocketTransportFactory {
    url: String,
}

impl TokioWebSocketTransportFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TransportFactory for TokioWebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        info!("Dialing {}", self.url);
        let (client, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;

        let (sink, stream) = client.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let is_connected = Arc::new(AtomicBool::new(true));
        let transport = Arc::new(TokioWebSocketTransport::new(sink, is_connected.clone()));

        // Connected must be queued ahead of any frame the pump forwards.
        let _ = event_tx.send(TransportEvent::Connected).await;
        tokio::task::spawn(read_pump(stream, event_tx, is_connected));

        Ok((transport, event_rx))
    }
}

async fn read_pump(
    mut stream: WsStream,
    event_tx: mpsc::Sender<TransportEvent>,
    is_connected: Arc<AtomicBool>,
) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                trace!("<-- Received text frame: {} bytes", text.len());
                if event_tx
                    .send(TransportEvent::TextReceived(text.as_str().to_owned()))
                    .await
                    .is_err()
                {
                    warn!("Event receiver dropped, closing read pump");
                    break;
                }
            }
            Some(Ok(Message::Close(_))) => {
                trace!("Received close frame");
                break;
            }
            Some(Ok(_)) => {
                // Ping/pong are answered by tungstenite; binary frames are not part of the protocol.
            }
            Some(Err(e)) => {
                error!("Error reading from websocket: {e}");
                let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                break;
            }
            None => {
                trace!("Websocket stream ended");
                break;
            }
        }
    }

    is_connected.store(false, Ordering::SeqCst);
    let _ = event_tx.send(TransportEvent::Disconnected).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_keeps_url() {
        let factory = TokioWebSocketTransportFactory::new("wss://rtc.example.com:443");
        assert_eq!(factory.url(), "wss://rtc.example.com:443");
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let factory = TokioWebSocketTransportFactory::new("ws://127.0.0.1:1");
        assert!(factory.create_transport().await.is_err());
    }
}
