//! Timeout constants and wrappers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Deadline for the modem to echo a written frame.
pub const WIRE_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Deadline for a device to answer a direct command.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// Idle time after each write before the next frame goes out.
pub const SETTLE_INTERVAL: Duration = Duration::from_millis(500);

/// Deadline for establishing the transport.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `future`, mapping deadline expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_ms = duration.as_millis() as u64, "Operation timed out");
            Err(ProtocolError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        };
        let result = with_timeout_error(slow, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let failing = async { Err::<(), _>(ProtocolError::ConnectionClosed) };
        let result = with_timeout_error(failing, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
