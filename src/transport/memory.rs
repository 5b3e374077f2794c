//! In-process transport over a Tokio duplex pipe.
//!
//! Each `connect` creates a fresh pipe and hands the far end to whoever holds the
//! [`MemoryPeer`], typically a simulated modem. Dropping the far end looks like a
//! lost link to the connection.

use crate::error::{ProtocolError, Result};
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::debug;

const PIPE_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<DuplexStream>,
    refuse: Arc<AtomicBool>,
}

/// Receives the modem end of every pipe the transport opens.
#[derive(Debug)]
pub struct MemoryPeer {
    streams: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryPeer) {
        let (peers, streams) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                refuse: Arc::new(AtomicBool::new(false)),
            },
            MemoryPeer { streams },
        )
    }

    /// Make subsequent connects fail, simulating an unreachable modem.
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Transport for MemoryTransport {
    type Stream = DuplexStream;

    async fn connect(&self) -> Result<DuplexStream> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ProtocolError::TransportError("memory link refused".into()));
        }
        let (host, modem) = tokio::io::duplex(PIPE_CAPACITY);
        self.peers
            .send(modem)
            .map_err(|_| ProtocolError::TransportError("memory peer dropped".into()))?;
        debug!("Memory link opened");
        Ok(host)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

impl MemoryPeer {
    /// Wait for the next connection attempt to land.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.streams.recv().await
    }
}
