//! Simulated modem for integration tests.
//!
//! The simulator accepts every link a [`MemoryTransport`] opens, decodes what the host
//! writes with the modem-side codec and answers through a responder closure. Every
//! decoded frame is also forwarded to the returned channel so tests can assert on
//! exactly what went over the wire.

#![allow(dead_code, clippy::unwrap_used)]

use futures::{SinkExt, StreamExt};
use insteon_protocol::config::EngineConfig;
use insteon_protocol::core::address::Address;
use insteon_protocol::core::codec::ModemCodec;
use insteon_protocol::core::flags::{MessageFlags, MessageType};
use insteon_protocol::core::message::{
    Ack, Body, InsteonMessage, LinkRecord, Message, MessageId, UserData,
};
use insteon_protocol::transport::MemoryPeer;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Address the simulated modem reports for itself.
pub const MODEM: Address = Address::new([0x44, 0x85, 0x11]);
/// A simulated dimmer.
pub const DIMMER: Address = Address::new([0x1a, 0x2b, 0x3c]);

/// Engine config tuned for tests: no settle delay, short deadlines.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default_with_overrides(|config| {
        config.connection.settle_interval = Duration::from_millis(1);
        config.connection.reconnect_initial_delay = Duration::from_millis(100);
        config.request.wire_ack_timeout = Duration::from_millis(500);
        config.request.reply_timeout = Duration::from_millis(500);
    })
}

/// Serve every link on `peer` with `respond`. Returns the frames the host wrote.
pub fn spawn_modem<F>(mut peer: MemoryPeer, mut respond: F) -> mpsc::UnboundedReceiver<Message>
where
    F: FnMut(&Message) -> Vec<Message> + Send + 'static,
{
    let (written, frames) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(stream) = peer.accept().await {
            let mut link = Framed::new(stream, ModemCodec::modem());
            while let Some(Ok(frame)) = link.next().await {
                let _ = written.send(frame.clone());
                for reply in respond(&frame) {
                    if link.send(reply).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    frames
}

/// Everything the host has written so far.
pub fn drain(frames: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
    std::iter::from_fn(|| frames.try_recv().ok()).collect()
}

pub fn ack(frame: &Message) -> Message {
    frame.clone().with_ack(Ack::Ack)
}

pub fn nak(frame: &Message) -> Message {
    frame.clone().with_ack(Ack::Nak)
}

/// A frame a device sent to the modem.
pub fn from_device(
    address: Address,
    kind: MessageType,
    cmd1: u8,
    cmd2: u8,
    user_data: Option<UserData>,
) -> Message {
    Message::new(Body::Received(InsteonMessage {
        address,
        target: Some(MODEM),
        flags: MessageFlags::new(kind, user_data.is_some()),
        cmd1,
        cmd2,
        user_data,
    }))
}

pub fn direct_ack(address: Address, cmd1: u8, cmd2: u8) -> Message {
    from_device(address, MessageType::DirectAck, cmd1, cmd2, None)
}

pub fn direct_nak(address: Address, cmd1: u8, reason: u8) -> Message {
    from_device(address, MessageType::DirectNak, cmd1, reason, None)
}

/// The carrier part of a direct frame the host sent, if it was one.
pub fn sent_to(frame: &Message) -> Option<&InsteonMessage> {
    match &frame.body {
        Body::Send(insteon) => Some(insteon),
        _ => None,
    }
}

/// Answers the modem's link-record walk from `records`, then NAKs. Manage-record
/// commands are acknowledged.
pub fn modem_table(records: Vec<LinkRecord>) -> impl FnMut(&Message) -> Vec<Message> + Send {
    let mut cursor = 0usize;
    move |frame| match &frame.body {
        Body::Bare(MessageId::GetFirstAllLinkRecord) => {
            cursor = 0;
            next_record(&records, &mut cursor, frame)
        }
        Body::Bare(MessageId::GetNextAllLinkRecord) => next_record(&records, &mut cursor, frame),
        _ => vec![ack(frame)],
    }
}

fn next_record(records: &[LinkRecord], cursor: &mut usize, frame: &Message) -> Vec<Message> {
    match records.get(*cursor) {
        Some(record) => {
            *cursor += 1;
            vec![ack(frame), Message::new(Body::AllLinkRecord(*record))]
        }
        None => vec![nak(frame)],
    }
}

/// An I2CS device answering engine-version, extended link-database reads and writes
/// from an in-memory byte image keyed by record address.
pub fn aldb_device(
    address: Address,
    mut records: BTreeMap<u16, [u8; 8]>,
) -> impl FnMut(&Message) -> Vec<Message> + Send {
    move |frame| {
        let Some(insteon) = sent_to(frame).filter(|insteon| insteon.address == address) else {
            return vec![ack(frame)];
        };
        match (insteon.cmd1, insteon.user_data) {
            (0x0D, None) => vec![ack(frame), direct_ack(address, 0x0D, 0x02)],
            (0x2F, Some(data)) if data.get(2) == 0x00 => {
                let mem_addr = u16::from_be_bytes([data.get(3), data.get(4)]);
                let mut replies = vec![ack(frame), direct_ack(address, 0x2F, 0x00)];
                if let Some(bytes) = records.get(&mem_addr) {
                    replies.push(record_response(address, mem_addr, bytes));
                }
                replies
            }
            (0x2F, Some(data)) if data.get(2) == 0x02 => {
                let mem_addr = u16::from_be_bytes([data.get(3), data.get(4)]);
                let mut bytes = [0u8; 8];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    *byte = data.get(6 + i);
                }
                records.insert(mem_addr, bytes);
                vec![ack(frame), direct_ack(address, 0x2F, 0x00)]
            }
            _ => vec![ack(frame), direct_ack(address, insteon.cmd1, insteon.cmd2)],
        }
    }
}

pub fn record_response(address: Address, mem_addr: u16, bytes: &[u8; 8]) -> Message {
    let [hi, lo] = mem_addr.to_be_bytes();
    let mut data = UserData::from_fields(&[(2, 0x01), (3, hi), (4, lo)]);
    for (i, byte) in bytes.iter().enumerate() {
        data.set(6 + i, *byte);
    }
    from_device(
        address,
        MessageType::Direct,
        0x2F,
        0x00,
        Some(data.with_checksum(0x2F, 0x00)),
    )
}
