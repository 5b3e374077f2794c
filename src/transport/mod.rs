//! # Transport Layer
//!
//! Byte-stream links to the modem.
//!
//! The engine only needs an ordered duplex byte stream: frames are read by the
//! connection's read loop and written by its write loop, and back-pressure comes from
//! the stream's write readiness. Dropping the stream closes the link.
//!
//! ## Transports
//! - **TCP**: Insteon Hub raw port (9761) or a serial-to-TCP bridge
//! - **Local**: Unix domain socket exposed by a serial bridge (unix only)
//! - **Memory**: in-process duplex pipe for simulators and tests

use crate::error::Result;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod local;
pub mod memory;
pub mod tcp;

pub use memory::{MemoryPeer, MemoryTransport};
pub use tcp::TcpTransport;

/// Something that can (re)open a byte stream to the modem.
///
/// `connect` is called once per connection attempt; the supervisor calls it again
/// after the previous stream fails.
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Stream>> + Send;

    /// Human-readable endpoint for logs.
    fn describe(&self) -> String;
}
