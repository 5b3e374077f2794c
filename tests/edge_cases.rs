#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge cases across the stack: address and pattern parsing, command validation,
//! mesh repeats over a live link, and link-database reads that stall or fall back.

mod common;

use common::*;
use insteon_protocol::aldb::{AldbManager, AldbStatus, EngineVersion};
use insteon_protocol::core::address::Address;
use insteon_protocol::core::flags::{MessageFlags, MessageType};
use insteon_protocol::core::message::{Body, InsteonMessage, Message};
use insteon_protocol::error::ProtocolError;
use insteon_protocol::protocol::{Command, EventKind, Topic, TopicPattern};
use insteon_protocol::service::{Connection, Coordinator};
use insteon_protocol::transport::MemoryTransport;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

// ============================================================================
// PARSING
// ============================================================================

#[test]
fn test_address_formats() {
    let expected = Address::new([0x1a, 0x2b, 0x3c]);
    for text in ["1a.2b.3c", "1A2B3C", "1a:2b:3c", "1a 2b 3c"] {
        assert_eq!(text.parse::<Address>().unwrap(), expected, "{text}");
    }
    for text in ["", "1a.2b", "1a.2b.3c.4d", "zz.zz.zz"] {
        assert!(text.parse::<Address>().is_err(), "{text}");
    }
}

#[test]
fn test_pattern_no_group_segment() {
    let pattern = TopicPattern::parse("modem._.get_im*").unwrap();
    let topic = Topic {
        address: None,
        group: None,
        name: "get_im_info",
        kind: EventKind::Ack,
    };
    assert!(pattern.matches(&topic));
    assert!(!pattern.matches(&Topic {
        group: Some(1),
        ..topic.clone()
    }));
    assert!(!pattern.matches(&Topic {
        address: Some(DIMMER),
        ..topic
    }));
}

#[test]
fn test_pattern_rejects_malformed() {
    for pattern in ["a.b.c.d.e", "1a2b3c.x", "*.*.on.loud", "1a2b.1"] {
        assert!(TopicPattern::parse(pattern).is_err(), "{pattern}");
    }
}

// ============================================================================
// COMMAND VALIDATION
// ============================================================================

#[test]
fn test_record_addresses_must_end_in_7_or_f() {
    let read = |mem_addr| Command::ReadAldb {
        address: DIMMER,
        mem_addr,
        num_records: 1,
    };
    assert!(read(0x0FFF).to_message().is_ok());
    assert!(read(0x0FF7).to_message().is_ok());
    // zero asks for the whole table
    assert!(read(0x0000).to_message().is_ok());
    assert!(matches!(
        read(0x0FF8).to_message(),
        Err(ProtocolError::InvalidField { field: "mem_addr", .. })
    ));
}

#[test]
fn test_num_records_limited() {
    let command = Command::ReadAldb {
        address: DIMMER,
        mem_addr: 0x0FFF,
        num_records: 2,
    };
    assert!(command.to_message().is_err());
}

#[test]
fn test_group_zero_rejected_everywhere() {
    assert!(Command::SendAllLink {
        group: 0,
        cmd1: 0x11,
        cmd2: 0
    }
    .to_message()
    .is_err());
    assert!(Command::Off {
        address: DIMMER,
        group: 0,
        fast: true
    }
    .to_message()
    .is_err());
}

// ============================================================================
// MESH REPEATS OVER A LIVE LINK
// ============================================================================

fn received(kind: MessageType, hops_left: u8, target: Address, cmd2: u8) -> Message {
    Message::new(Body::Received(InsteonMessage {
        address: DIMMER,
        target: Some(target),
        flags: MessageFlags::new(kind, false).with_hops(hops_left, 3),
        cmd1: 0x11,
        cmd2,
        user_data: None,
    }))
}

#[tokio::test(start_paused = true)]
async fn test_one_press_one_event() {
    let (transport, mut peer) = MemoryTransport::new();
    let connection = Connection::open(transport, &fast_config());
    let mut presses = connection
        .bus()
        .subscribe(TopicPattern::parse(&format!("{}.1.on", DIMMER.id())).unwrap())
        .unwrap();
    let mut stream = peer.accept().await.unwrap();

    let group = Address::new([0x00, 0x00, 0x01]);
    let copies = [
        received(MessageType::AllLinkBroadcast, 3, group, 0x00),
        received(MessageType::AllLinkBroadcast, 2, group, 0x00),
        received(MessageType::AllLinkBroadcast, 1, group, 0x00),
        received(MessageType::AllLinkCleanup, 3, MODEM, 0x01),
        received(MessageType::AllLinkCleanup, 2, MODEM, 0x01),
    ];
    for copy in &copies {
        stream.write_all(&copy.to_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let first = presses.recv().await.unwrap();
    assert_eq!(
        first.topic.kind,
        EventKind::Insteon(MessageType::AllLinkBroadcast)
    );
    assert!(presses.try_recv().is_none());
    assert_eq!(
        connection.metrics().snapshot().dedup_drops,
        copies.len() as u64 - 1
    );

    // a second press well after the first is a new event
    tokio::time::sleep(Duration::from_secs(3)).await;
    stream.write_all(&copies[0].to_bytes()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(presses.recv().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_codes_use_fallback_name() {
    let (transport, mut peer) = MemoryTransport::new();
    let connection = Connection::open(transport, &fast_config());
    let mut events = connection.bus().subscribe(TopicPattern::any()).unwrap();
    let mut stream = peer.accept().await.unwrap();

    let odd = from_device(DIMMER, MessageType::Direct, 0xEE, 0x00, None);
    stream.write_all(&odd.to_bytes()).await.unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.topic.name, "standard_received");
    assert_eq!(connection.metrics().snapshot().correlation_misses, 1);
}

// ============================================================================
// REQUESTS ON A CLOSED LINK
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_send_after_close() {
    let (transport, peer) = MemoryTransport::new();
    let _written = spawn_modem(peer, |frame| vec![ack(frame)]);
    let connection = Connection::open(transport, &fast_config());
    let coordinator = Coordinator::new(connection.clone());
    connection.close();

    let result = coordinator.send(&Command::Ping { address: DIMMER }).await;
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
}

// ============================================================================
// LINK DATABASE READS
// ============================================================================

/// An I1 device: engine 0x00, records read with set-MSB plus byte peeks.
fn peek_device(
    address: Address,
    memory: BTreeMap<u16, u8>,
) -> impl FnMut(&Message) -> Vec<Message> + Send {
    let mut msb = 0u8;
    move |frame| {
        let Some(insteon) = sent_to(frame).filter(|insteon| insteon.address == address) else {
            return vec![ack(frame)];
        };
        let reply = match insteon.cmd1 {
            0x0D => direct_ack(address, 0x0D, 0x00),
            0x28 => {
                msb = insteon.cmd2;
                direct_ack(address, 0x28, msb)
            }
            0x2B => {
                let mem_addr = u16::from_be_bytes([msb, insteon.cmd2]);
                let value = memory.get(&mem_addr).copied().unwrap_or(0);
                direct_ack(address, 0x2B, value)
            }
            cmd1 => direct_ack(address, cmd1, insteon.cmd2),
        };
        vec![ack(frame), reply]
    }
}

fn lay_out(memory: &mut BTreeMap<u16, u8>, mem_addr: u16, record: [u8; 8]) {
    for (offset, byte) in (0u16..).zip(record) {
        memory.insert(mem_addr - offset, byte);
    }
}

#[tokio::test(start_paused = true)]
async fn test_i1_device_read_by_peeks() {
    let mut memory = BTreeMap::new();
    lay_out(
        &mut memory,
        0x0FFF,
        [0xE2, 0x01, 0x44, 0x85, 0x11, 0x03, 0x1F, 0x01],
    );
    lay_out(&mut memory, 0x0FF7, [0x00; 8]);

    let (transport, peer) = MemoryTransport::new();
    let _written = spawn_modem(peer, peek_device(DIMMER, memory));
    let manager = AldbManager::new(Coordinator::new(Connection::open(transport, &fast_config())));
    let dimmer = manager.device(DIMMER).unwrap();

    assert_eq!(manager.load(&dimmer).await.unwrap(), AldbStatus::Loaded);
    assert_eq!(dimmer.engine(), Some(EngineVersion::I1));
    let table = dimmer.snapshot().unwrap();
    let record = table.get(0x0FFF).unwrap();
    assert!(record.controller && record.in_use);
    assert_eq!(record.target, MODEM);
    assert_eq!(record.data, [0x03, 0x1F, 0x01]);
    assert_eq!(table.high_water_mark(), Some(0x0FF7));
}

#[tokio::test(start_paused = true)]
async fn test_engine_version_nak_means_i2cs() {
    let (transport, peer) = MemoryTransport::new();
    let _written = spawn_modem(peer, |frame| match sent_to(frame) {
        Some(insteon) if insteon.cmd1 == 0x0D => {
            vec![ack(frame), direct_nak(insteon.address, 0x0D, 0xFF)]
        }
        _ => vec![ack(frame)],
    });
    let manager = AldbManager::new(Coordinator::new(Connection::open(transport, &fast_config())));

    assert_eq!(
        manager.engine_version(DIMMER).await.unwrap(),
        EngineVersion::I2Cs
    );
    assert_eq!(
        manager.device(DIMMER).unwrap().engine(),
        Some(EngineVersion::I2Cs)
    );
}

#[tokio::test(start_paused = true)]
async fn test_stalled_read_is_partial_then_resumes() {
    let mut image = BTreeMap::new();
    image.insert(0x0FFF, [0xA2, 0x01, 0x44, 0x85, 0x11, 0xFF, 0x1F, 0x01]);
    image.insert(0x0FF7, [0x00; 8]);

    let healthy = Arc::new(AtomicBool::new(false));
    let gate = healthy.clone();
    let mut device = aldb_device(DIMMER, image);
    let (transport, peer) = MemoryTransport::new();
    let _written = spawn_modem(peer, move |frame| {
        let stalled = sent_to(frame)
            .and_then(|insteon| insteon.user_data)
            .is_some_and(|data| data.get(4) == 0xF7);
        if stalled && !gate.load(Ordering::SeqCst) {
            vec![ack(frame)]
        } else {
            device(frame)
        }
    });
    let manager = AldbManager::new(Coordinator::new(Connection::open(transport, &fast_config())));
    let dimmer = manager.device(DIMMER).unwrap();

    assert_eq!(manager.load(&dimmer).await.unwrap(), AldbStatus::Partial);
    assert_eq!(dimmer.snapshot().unwrap().resume_address(), 0x0FF7);

    healthy.store(true, Ordering::SeqCst);
    assert_eq!(manager.resume(&dimmer).await.unwrap(), AldbStatus::Loaded);
    let table = dimmer.snapshot().unwrap();
    assert_eq!(table.len(), 2);
    assert!(!table.get(0x0FFF).unwrap().controller);
}

#[tokio::test(start_paused = true)]
async fn test_table_state_survives_refused_removal() {
    let (transport, peer) = MemoryTransport::new();
    let _written = spawn_modem(peer, modem_table(Vec::new()));
    let manager = AldbManager::new(Coordinator::new(Connection::open(transport, &fast_config())));
    let modem = manager.modem().unwrap();
    manager.load(&modem).await.unwrap();

    // the only record is the end marker
    assert!(modem.remove(0x3FFF).is_err());
    assert!(modem.remove(0x3FF7).is_err());
    assert!(!modem.snapshot().unwrap().has_pending());
    assert_eq!(modem.status().unwrap(), AldbStatus::Loaded);
}
