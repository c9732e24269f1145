//! Concrete WebSocket transport.

mod ws;

pub use ws::WebSocketTransportFactory;
