//! TCP transport for the Insteon Hub and serial-to-TCP bridges.

use crate::error::{ProtocolError, Result};
use crate::transport::Transport;
use crate::utils::timeout::{with_timeout_error, CONNECT_TIMEOUT};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

/// Raw PLM port on the Insteon Hub.
pub const HUB_PORT: u16 = 9761;

#[derive(Debug, Clone)]
pub struct TcpTransport {
    address: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    /// `address` is `host:port`, or a bare host to use [`HUB_PORT`].
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let address = if address.contains(':') {
            address
        } else {
            format!("{address}:{HUB_PORT}")
        };
        Self {
            address,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;

    #[instrument(skip(self), fields(address = %self.address))]
    async fn connect(&self) -> Result<TcpStream> {
        let stream = with_timeout_error(
            async {
                TcpStream::connect(&self.address)
                    .await
                    .map_err(|e| ProtocolError::TransportError(format!("{}: {e}", self.address)))
            },
            self.connect_timeout,
        )
        .await?;
        // frames are tiny and latency-sensitive
        stream.set_nodelay(true)?;
        debug!("TCP link established");
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}
