//! Supervised modem connection.
//!
//! [`Connection::open`] spawns a supervisor task that owns the transport. Each session
//! runs a read loop (decode frames, hand them to the [`Dispatcher`]) and a write loop
//! (pop the [`WriteQueue`], write one frame, idle for the settle interval). When the
//! link drops the supervisor reconnects with exponential backoff until the connection
//! is closed. Queued frames survive a reconnect; [`Connection::close`] discards them.

use crate::config::{ConnectionConfig, EngineConfig};
use crate::core::codec::ModemCodec;
use crate::core::message::Message;
use crate::error::{ProtocolError, Result};
use crate::protocol::bus::EventBus;
use crate::protocol::dispatcher::Dispatcher;
use crate::service::queue::{Priority, WriteQueue};
use crate::transport::Transport;
use crate::utils::backoff::Backoff;
use crate::utils::metrics::Metrics;
use crate::utils::time::{SharedClock, TokioClock};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tokio_util::codec::FramedRead;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, instrument, warn};

struct Shared {
    bus: EventBus,
    queue: Arc<WriteQueue>,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    clock: SharedClock,
    config: EngineConfig,
    cancel: CancellationToken,
    connected: watch::Sender<bool>,
}

/// Handle to a supervised modem link. Clones share the link; it closes when
/// [`Connection::close`] is called or the last handle is dropped.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}

impl Connection {
    /// Open a connection on Tokio's clock. Must be called inside a runtime.
    pub fn open<T: Transport>(transport: T, config: &EngineConfig) -> Self {
        Self::open_with_clock(transport, config, Arc::new(TokioClock))
    }

    pub fn open_with_clock<T: Transport>(
        transport: T,
        config: &EngineConfig,
        clock: SharedClock,
    ) -> Self {
        let bus = EventBus::new();
        let queue = Arc::new(WriteQueue::new());
        let metrics = Arc::new(Metrics::new());
        let dispatcher = Dispatcher::new(
            bus.clone(),
            queue.clone(),
            metrics.clone(),
            config.dedup.settings(),
            clock.clone(),
        )
        .with_retransmit_limit(config.connection.retransmit_limit);
        let cancel = CancellationToken::new();
        let (connected, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            bus,
            queue,
            dispatcher,
            metrics,
            clock,
            config: config.clone(),
            cancel: cancel.clone(),
            connected,
        });

        tokio::spawn(supervise(transport, shared.clone()));
        Self {
            shared,
            _guard: Arc::new(cancel.drop_guard()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }

    pub fn clock(&self) -> &SharedClock {
        &self.shared.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Queue a frame for writing.
    pub fn send(&self, message: &Message, priority: Priority) -> Result<()> {
        self.send_raw(message.to_bytes(), priority)
    }

    /// Queue pre-encoded bytes for writing.
    pub fn send_raw(&self, frame: Bytes, priority: Priority) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.shared.queue.push(frame, priority)
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Wait until the transport is up.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut connected = self.shared.connected.subscribe();
        tokio::select! {
            _ = self.shared.cancel.cancelled() => Err(ProtocolError::ConnectionClosed),
            result = connected.wait_for(|up| *up) => {
                result.map(|_| ()).map_err(|_| ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Stop reconnecting, drop the link and discard queued writes.
    pub fn close(&self) {
        if !self.shared.cancel.is_cancelled() {
            info!("Closing modem connection");
        }
        self.shared.cancel.cancel();
        self.shared.queue.clear();
    }
}

#[instrument(skip_all, fields(transport = %transport.describe()))]
async fn supervise<T: Transport>(transport: T, shared: Arc<Shared>) {
    let settings: &ConnectionConfig = &shared.config.connection;
    let mut backoff = Backoff::new(settings.reconnect_initial_delay, settings.reconnect_max_delay);

    loop {
        let attempt = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            attempt = transport.connect() => attempt,
        };

        match attempt {
            Ok(stream) => {
                backoff.reset();
                shared.metrics.connected();
                shared.connected.send_replace(true);
                info!("Modem link up");

                let outcome = run_session(stream, &shared).await;
                shared.connected.send_replace(false);
                if shared.cancel.is_cancelled() {
                    break;
                }
                match outcome {
                    Ok(()) => warn!("Modem link closed by peer"),
                    Err(e) => warn!(error = %e, "Modem link lost"),
                }
                shared.metrics.reconnect();
            }
            Err(e) => {
                warn!(error = %e, attempts = backoff.attempts(), "Modem connect failed");
            }
        }

        let delay = backoff.next_delay();
        info!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = shared.clock.sleep(delay) => {}
        }
    }

    shared.connected.send_replace(false);
    info!("Modem supervisor stopped");
}

async fn run_session<S>(stream: S, shared: &Shared) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (reader, writer) = tokio::io::split(stream);
    tokio::select! {
        _ = shared.cancel.cancelled() => Ok(()),
        result = read_loop(reader, shared) => result,
        result = write_loop(writer, shared) => result,
    }
}

async fn read_loop<S>(reader: ReadHalf<S>, shared: &Shared) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut frames = FramedRead::new(reader, ModemCodec::host());
    while let Some(frame) = frames.next().await {
        let message = frame?;
        shared.metrics.bytes_read(message.to_bytes().len() as u64);
        debug!(id = %message.id(), ack = ?message.ack, "Frame received");
        if let Err(e) = shared.dispatcher.dispatch(message) {
            warn!(error = %e, "Failed to dispatch frame");
        }
    }
    Ok(())
}

async fn write_loop<S>(mut writer: WriteHalf<S>, shared: &Shared) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        let (frame, priority) = shared.queue.pop().await;
        shared.dispatcher.note_written(&frame, priority);

        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            shared.queue.push_front(frame, priority)?;
            return Err(e.into());
        }

        shared.metrics.frame_sent(frame.len() as u64);
        debug!(frame = ?frame.as_ref(), ?priority, "Frame written");
        shared.clock.sleep(shared.config.connection.settle_interval).await;
    }
}
