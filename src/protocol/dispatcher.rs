use crate::core::flags::MessageType;
use crate::core::message::{Body, Direction, Message};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::bus::EventBus;
use crate::protocol::correlation::{is_fallback, CorrelationTable};
use crate::protocol::topic::Topic;
use crate::service::queue::{Priority, WriteQueue};
use crate::utils::dedup::{BroadcastDeduplicator, CleanupFilter, DedupKey, DedupSettings};
use crate::utils::metrics::Metrics;
use crate::utils::time::SharedClock;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Automatic retransmits of one frame after modem NAKs.
pub const DEFAULT_RETRANSMIT_LIMIT: u32 = 3;

#[derive(Debug)]
struct InFlight {
    frame: Bytes,
    priority: Priority,
    retransmits: u32,
}

/// Routes decoded frames to the event bus.
///
/// Repeated mesh traffic is filtered first. Modem NAKs for the frame this connection
/// last wrote are retransmitted, unless an owned subscription has claimed the frame,
/// in which case its owner decides.
pub struct Dispatcher {
    bus: EventBus,
    table: &'static CorrelationTable,
    queue: Arc<WriteQueue>,
    metrics: Arc<Metrics>,
    dedup: Mutex<BroadcastDeduplicator>,
    cleanups: Mutex<CleanupFilter>,
    in_flight: Mutex<Option<InFlight>>,
    retransmit_limit: u32,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("bus", &self.bus)
            .field("retransmit_limit", &self.retransmit_limit)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        bus: EventBus,
        queue: Arc<WriteQueue>,
        metrics: Arc<Metrics>,
        dedup: DedupSettings,
        clock: SharedClock,
    ) -> Self {
        Self {
            bus,
            table: CorrelationTable::global(),
            queue,
            metrics,
            dedup: Mutex::new(BroadcastDeduplicator::new(dedup, clock.clone())),
            cleanups: Mutex::new(CleanupFilter::new(
                dedup.cleanup_window,
                dedup.max_entries,
                clock,
            )),
            in_flight: Mutex::new(None),
            retransmit_limit: DEFAULT_RETRANSMIT_LIMIT,
        }
    }

    pub fn with_retransmit_limit(mut self, limit: u32) -> Self {
        self.retransmit_limit = limit;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Record the frame just written so a NAK echo can be matched to it.
    pub fn note_written(&self, frame: &Bytes, priority: Priority) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            match in_flight.as_mut() {
                Some(current) if current.frame == *frame => {}
                _ => {
                    *in_flight = Some(InFlight {
                        frame: frame.clone(),
                        priority,
                        retransmits: 0,
                    })
                }
            }
        }
    }

    /// Route one decoded frame. Returns the number of subscribers reached.
    pub fn dispatch(&self, message: Message) -> Result<usize> {
        self.metrics.frame_received();
        let topics = self.table.topics(&message);

        if let Body::Received(insteon) = &message.body {
            if topics.iter().all(|t| is_fallback(t.name)) {
                self.metrics.correlation_miss();
                let miss = ProtocolError::CorrelationMiss {
                    cmd1: insteon.cmd1,
                    cmd2: insteon.cmd2,
                };
                debug!(address = %insteon.address, error = %miss, "Publishing under fallback name");
            }
            let kind = insteon.flags.message_type;
            if kind.is_repeated() {
                let Some(first) = topics.first() else {
                    return Ok(0);
                };
                let key = DedupKey {
                    address: insteon.address,
                    name: first.name,
                    group: first.group,
                };
                if !self.admit(key, kind, insteon.flags.hops_left)? {
                    self.metrics.dedup_drop();
                    return Ok(0);
                }
            }
        }

        if message.is_nak() {
            self.metrics.nak();
            self.handle_nak(&message, &topics);
        }

        for topic in &topics {
            debug!(%topic, "Dispatching frame");
        }
        self.bus.publish(&topics, Arc::new(message))
    }

    fn admit(&self, key: DedupKey, kind: MessageType, hops_left: u8) -> Result<bool> {
        let fresh = self
            .dedup
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DEDUP_LOCK.to_string()))?
            .admit(key.clone(), hops_left);
        if !fresh {
            return Ok(false);
        }

        let mut cleanups = self
            .cleanups
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DEDUP_LOCK.to_string()))?;
        match kind {
            MessageType::AllLinkBroadcast => {
                cleanups.broadcast_fired(key);
                Ok(true)
            }
            MessageType::AllLinkCleanup => Ok(cleanups.cleanup_fires(&key)),
            _ => Ok(true),
        }
    }

    fn handle_nak(&self, message: &Message, topics: &[Topic]) {
        let Ok(mut in_flight) = self.in_flight.lock() else {
            return;
        };
        let Some(current) = in_flight.as_mut() else {
            return;
        };
        if !is_echo_of(&current.frame, message) {
            debug!(id = %message.id(), "NAK for a frame this connection did not write");
            return;
        }

        if topics.iter().any(|topic| self.bus.is_claimed(topic)) {
            debug!(id = %message.id(), "NAK claimed by a pending request");
            return;
        }

        if current.retransmits >= self.retransmit_limit {
            warn!(
                id = %message.id(),
                retransmits = current.retransmits,
                "Modem keeps refusing frame, giving up"
            );
            *in_flight = None;
            return;
        }

        current.retransmits += 1;
        warn!(
            id = %message.id(),
            attempt = current.retransmits,
            "Modem NAK, retransmitting"
        );
        if let Err(e) = self.queue.push_front(current.frame.clone(), current.priority) {
            warn!(error = %e, "Retransmit could not be queued");
            return;
        }
        self.metrics.retransmit();
    }
}

fn is_echo_of(written: &Bytes, echo: &Message) -> bool {
    Message::parse(written, Direction::ToModem).is_ok_and(|sent| echo.echoes(&sent))
}
