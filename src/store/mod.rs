//! Session state: message logs, de-duplication, optimistic reconciliation,
//! archival bookkeeping.

pub mod dedup;
pub mod session_store;
pub mod traits;

pub use session_store::{FileRef, SessionStore};
pub use traits::{KeyValueStore, MemoryStore};
