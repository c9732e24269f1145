pub mod calls;
pub mod client;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod router;
pub mod socket;
pub mod store;
pub mod transport;
pub mod types;

pub use client::{Client, ClientConfig};
pub use connection::{Connection, ConnectionConfig, ReconnectPolicy};
pub use envelope::Envelope;
pub use error::ClientError;
