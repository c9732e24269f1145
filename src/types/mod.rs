pub mod call;
pub mod events;
pub mod message;
pub mod session;
