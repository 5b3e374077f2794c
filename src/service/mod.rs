//! # Service Layer
//!
//! The supervised modem connection and request/response handling on top of it.
//!
//! - [`connection`]: transport ownership, read/write loops, reconnect with backoff
//! - [`queue`]: two-tier outbound write queue
//! - [`coordinator`]: send a command, wait for the modem echo and the device reply

pub mod connection;
pub mod coordinator;
pub mod queue;

pub use connection::Connection;
pub use coordinator::{Coordinator, Response, ResponseStatus, SendOptions};
pub use queue::Priority;
