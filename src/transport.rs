//! Transport seam: the connection logic is written against these traits so
//! tests can drive it with scripted sockets.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text frame has been received from the server.
    FrameReceived(String),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active duplex connection to the relay server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one serialized envelope as a text frame.
    async fn send_frame(&self, frame: &str) -> Result<(), anyhow::Error>;

    /// Sends a transport-level ping. A failure here is treated as a
    /// connectivity loss by the caller.
    async fn ping(&self) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Dials the endpoint and returns the transport along with its stream of
    /// events.
    async fn create_transport(
        &self,
        endpoint: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

#[cfg(test)]
pub mod mock {
    use super::*;

    /// A transport that accepts everything and does nothing.
    pub struct MockTransport;

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_frame(&self, _frame: &str) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn ping(&self) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn disconnect(&self) {}
    }

    #[derive(Default)]
    pub struct MockTransportFactory;

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn create_transport(
            &self,
            _endpoint: &str,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            let (_tx, rx) = mpsc::channel(1);
            Ok((Arc::new(MockTransport), rx))
        }
    }
}
