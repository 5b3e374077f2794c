//! Unix domain socket transport.
//!
//! Serial bridges such as `socat` or `ser2net` can expose a PLM's tty as a local
//! socket; this connects to it. Unix only.

#![cfg(unix)]

use crate::error::{ProtocolError, Result};
use crate::transport::Transport;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct UnixSocketTransport {
    path: PathBuf,
}

impl UnixSocketTransport {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Transport for UnixSocketTransport {
    type Stream = UnixStream;

    #[instrument(skip(self), fields(socket_path = %self.path.display()))]
    async fn connect(&self) -> Result<UnixStream> {
        let stream = UnixStream::connect(&self.path).await.map_err(|e| {
            ProtocolError::TransportError(format!("{}: {e}", self.path.display()))
        })?;
        debug!("Unix socket link established");
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!("unix://{}", self.path.display())
    }
}
