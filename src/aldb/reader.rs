//! Link-database read strategies.
//!
//! Every strategy yields records lazily in descending address order and stops after
//! the high-water mark. A read can resume from any record address.
//!
//! - [`ReadStrategy::Extended`]: one extended read request per record (I2/I2CS devices)
//! - [`ReadStrategy::Peek`]: set the address MSB, then peek the 8 record bytes (I1 devices)
//! - [`ReadStrategy::Modem`]: the modem's get-first/get-next walk; a NAK ends the table

use crate::aldb::record::{AldbRecord, RECORD_LEN};
use crate::aldb::AldbTarget;
use crate::core::address::Address;
use crate::core::message::{Body, MessageId};
use crate::error::{ProtocolError, Result};
use crate::protocol::bus::{Event, Subscription};
use crate::protocol::commands::{names, Command};
use crate::protocol::topic::TopicPattern;
use crate::service::coordinator::{Coordinator, ResponseStatus, SendOptions};
use crate::service::queue::Priority;
use futures::stream::{self, Stream};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    Extended,
    Peek,
    Modem,
}

#[derive(Debug)]
struct Cursor {
    next: u16,
    /// Records above this address are read and discarded (modem walk only).
    start: u16,
    /// The modem walk has issued its get-first.
    walking: bool,
    /// Address MSB the device currently has selected (peek only).
    msb: Option<u8>,
}

/// Reads one link database through the coordinator.
#[derive(Debug, Clone)]
pub struct AldbReader<'a> {
    coordinator: &'a Coordinator,
    target: AldbTarget,
    strategy: ReadStrategy,
    first_mem_addr: u16,
    retries: u32,
}

impl<'a> AldbReader<'a> {
    pub fn new(
        coordinator: &'a Coordinator,
        target: AldbTarget,
        strategy: ReadStrategy,
        first_mem_addr: u16,
        retries: u32,
    ) -> Self {
        Self {
            coordinator,
            target,
            strategy,
            first_mem_addr,
            retries,
        }
    }

    pub fn strategy(&self) -> ReadStrategy {
        self.strategy
    }

    /// Records from `start` downwards, ending with the high-water mark. A device that
    /// refuses a read ends the stream early; transport failures are yielded once as
    /// an error, then the stream ends.
    pub fn records(&self, start: u16) -> impl Stream<Item = Result<AldbRecord>> + '_ {
        let cursor = Cursor {
            next: match self.strategy {
                ReadStrategy::Modem => self.first_mem_addr,
                _ => start,
            },
            start,
            walking: false,
            msb: None,
        };
        stream::unfold(Some(cursor), move |cursor| async move {
            let mut cursor = cursor?;
            match self.next_record(&mut cursor).await {
                Ok(Some(record)) => {
                    let more = !record.high_water_mark;
                    let next = cursor.next.checked_sub(RECORD_LEN);
                    let state = match next {
                        Some(next) if more => {
                            cursor.next = next;
                            Some(cursor)
                        }
                        _ => None,
                    };
                    Some((Ok(record), state))
                }
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    async fn next_record(&self, cursor: &mut Cursor) -> Result<Option<AldbRecord>> {
        match (self.strategy, self.target) {
            (ReadStrategy::Modem, _) => loop {
                let record = self.read_modem(cursor).await?;
                if record.high_water_mark || cursor.next <= cursor.start {
                    return Ok(Some(record));
                }
                // resuming: skip what was already loaded
                cursor.next = cursor.next.saturating_sub(RECORD_LEN);
            },
            (ReadStrategy::Extended, AldbTarget::Device(address)) => {
                self.read_extended(address, cursor.next).await
            }
            (ReadStrategy::Peek, AldbTarget::Device(address)) => {
                self.read_peek(address, cursor).await.map(Some)
            }
            (strategy, AldbTarget::Modem) => Err(ProtocolError::Aldb(format!(
                "{strategy:?} reads need a device address"
            ))),
        }
    }

    fn options(&self) -> SendOptions {
        SendOptions {
            priority: Priority::Bulk,
            retries: self.retries,
        }
    }

    #[instrument(skip(self), fields(mem_addr = format_args!("{mem_addr:#06x}")))]
    async fn read_extended(&self, address: Address, mem_addr: u16) -> Result<Option<AldbRecord>> {
        let command = Command::ReadAldb {
            address,
            mem_addr,
            num_records: 1,
        };
        // retries happen here only, a silent device and a missing record response
        // both use up one attempt
        let once = SendOptions {
            retries: 0,
            ..self.options()
        };
        for attempt in 0..=self.retries {
            let mut responses = self.coordinator.connection().bus().subscribe(
                TopicPattern::device(address).with_name(names::ALDB_RECORD_RESPONSE),
            )?;
            let response = self.coordinator.send_with(&command, once).await?;
            match response.status {
                ResponseStatus::Success => {}
                _ if response.is_device_nak() => {
                    debug!("Device refused record read, ending table");
                    return Ok(None);
                }
                ResponseStatus::Unsent => return Err(ProtocolError::Timeout),
                status => {
                    warn!(?status, attempt, "Record read not acknowledged");
                    continue;
                }
            }

            let record = self
                .await_event(&mut responses, |event| {
                    let data = event.message.insteon()?.user_data?;
                    AldbRecord::from_user_data(&data)
                        .ok()
                        .filter(|record| record.mem_addr == mem_addr)
                })
                .await;
            match record {
                Some(record) => return Ok(Some(record)),
                None => warn!(attempt, "No record response before deadline"),
            }
        }
        Err(ProtocolError::Timeout)
    }

    /// Peek the 8 record bytes from `cursor.next` downwards, flags byte first.
    #[instrument(skip(self, cursor), fields(mem_addr = format_args!("{:#06x}", cursor.next)))]
    async fn read_peek(&self, address: Address, cursor: &mut Cursor) -> Result<AldbRecord> {
        let [msb, lsb] = cursor.next.to_be_bytes();
        if cursor.msb != Some(msb) {
            self.coordinator
                .send_with(&Command::SetAddressMsb { address, msb }, self.options())
                .await?
                .require(names::SET_ADDRESS_MSB)?;
            cursor.msb = Some(msb);
        }

        let mut bytes = [0u8; 8];
        for (offset, byte) in (0u8..).zip(bytes.iter_mut()) {
            let peek = Command::PeekOneByte {
                address,
                lsb: lsb.wrapping_sub(offset),
            };
            let reply = self
                .coordinator
                .send_with(&peek, self.options())
                .await?
                .require(names::PEEK_ONE_BYTE)?;
            *byte = reply
                .insteon()
                .map(|insteon| insteon.cmd2)
                .ok_or_else(|| ProtocolError::Aldb("peek reply carried no value".into()))?;
        }
        Ok(AldbRecord::from_bytes(cursor.next, &bytes))
    }

    /// One step of the modem walk. The NAK that ends the walk becomes a synthetic
    /// high-water mark at the next free address.
    async fn read_modem(&self, cursor: &mut Cursor) -> Result<AldbRecord> {
        let mut responses = self.coordinator.connection().bus().subscribe(
            TopicPattern::modem().with_name(MessageId::AllLinkRecordResponse.name()),
        )?;
        let command = if cursor.walking {
            Command::GetNextAllLinkRecord
        } else {
            Command::GetFirstAllLinkRecord
        };
        let response = self.coordinator.send_with(&command, self.options()).await?;
        match response.status {
            ResponseStatus::Success => cursor.walking = true,
            ResponseStatus::Failure if response.reply.is_some() => {
                debug!(mem_addr = format_args!("{:#06x}", cursor.next), "Modem table ends");
                return Ok(AldbRecord::high_water_mark_at(cursor.next));
            }
            _ => return Err(ProtocolError::Timeout),
        }

        let link = self
            .await_event(&mut responses, |event| match &event.message.body {
                Body::AllLinkRecord(link) => Some(*link),
                _ => None,
            })
            .await
            .ok_or(ProtocolError::Timeout)?;
        Ok(AldbRecord::from_link_record(cursor.next, &link))
    }

    /// First event `accept` maps to a value, or `None` once the reply deadline passes.
    async fn await_event<T>(
        &self,
        subscription: &mut Subscription,
        mut accept: impl FnMut(&Event) -> Option<T>,
    ) -> Option<T> {
        let mut deadline = self
            .coordinator
            .connection()
            .clock()
            .sleep(self.coordinator.config().reply_timeout);
        loop {
            tokio::select! {
                _ = &mut deadline => return None,
                event = subscription.recv() => {
                    let event = event?;
                    if let Some(value) = accept(&event) {
                        return Some(value);
                    }
                }
            }
        }
    }
}
