//! Property-based tests using proptest
//!
//! Framing, correlation and deduplication invariants over generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use insteon_protocol::aldb::AldbRecord;
use insteon_protocol::core::address::Address;
use insteon_protocol::core::codec::decode_frame;
use insteon_protocol::core::flags::{MessageFlags, MessageType};
use insteon_protocol::core::message::{
    Ack, Body, Direction, InsteonMessage, Message, UserData, USER_DATA_LEN,
};
use insteon_protocol::protocol::correlation::{CorrelationTable, Origin};
use insteon_protocol::protocol::{Command, TopicPattern};
use insteon_protocol::utils::{BroadcastDeduplicator, DedupKey, DedupSettings, ManualClock};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn address() -> impl Strategy<Value = Address> {
    any::<[u8; 3]>().prop_map(Address::new)
}

fn user_data() -> impl Strategy<Value = Option<UserData>> {
    prop::option::of(any::<[u8; USER_DATA_LEN]>().prop_map(UserData::new))
}

fn outbound() -> impl Strategy<Value = Message> {
    (address(), any::<u8>(), any::<u8>(), user_data()).prop_map(|(address, cmd1, cmd2, data)| {
        Message::new(Body::Send(InsteonMessage {
            address,
            target: None,
            flags: MessageFlags::direct(data.is_some()),
            cmd1,
            cmd2,
            user_data: data,
        }))
    })
}

fn inbound() -> impl Strategy<Value = Message> {
    (address(), address(), 0u8..8, 0u8..4, any::<u8>(), any::<u8>(), user_data()).prop_map(
        |(address, target, kind, hops, cmd1, cmd2, data)| {
            Message::new(Body::Received(InsteonMessage {
                address,
                target: Some(target),
                flags: MessageFlags::new(MessageType::from_bits(kind), data.is_some())
                    .with_hops(hops, 3),
                cmd1,
                cmd2,
                user_data: data,
            }))
        },
    )
}

// Property: what the host writes is what the modem reads
proptest! {
    #[test]
    fn prop_outbound_frames_survive_the_wire(message in outbound()) {
        let mut buf = BytesMut::from(message.to_bytes().as_ref());
        let decoded = decode_frame(&mut buf, Direction::ToModem);
        prop_assert_eq!(decoded, Some(message));
        prop_assert!(buf.is_empty());
    }
}

// Property: the modem's echo of any outbound frame is recognised as that frame's echo
proptest! {
    #[test]
    fn prop_echo_matches_sent(message in outbound(), nak in any::<bool>()) {
        let ack = if nak { Ack::Nak } else { Ack::Ack };
        let mut buf = BytesMut::from(message.clone().with_ack(ack).to_bytes().as_ref());
        let echo = decode_frame(&mut buf, Direction::FromModem).unwrap();
        prop_assert!(echo.echoes(&message));
        prop_assert_eq!(echo.is_nak(), nak);
    }
}

// Property: an incomplete frame is left alone, and asking again gives the same answer
proptest! {
    #[test]
    fn prop_truncated_frame_waits(message in inbound(), cut in 1usize..25) {
        let bytes = message.to_bytes();
        let cut = cut.min(bytes.len() - 1);
        let mut buf = BytesMut::from(&bytes[..cut]);

        prop_assert!(decode_frame(&mut buf, Direction::FromModem).is_none());
        prop_assert_eq!(&buf[..], &bytes[..cut]);
        prop_assert!(decode_frame(&mut buf, Direction::FromModem).is_none());
        prop_assert_eq!(buf.len(), cut);

        buf.extend_from_slice(&bytes[cut..]);
        prop_assert_eq!(decode_frame(&mut buf, Direction::FromModem), Some(message));
    }
}

// Property: arbitrary input never panics and never grows the buffer
proptest! {
    #[test]
    fn prop_garbage_is_consumed(noise in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut buf = BytesMut::from(noise.as_slice());
        let mut previous = buf.len() + 1;
        while buf.len() < previous {
            previous = buf.len();
            if decode_frame(&mut buf, Direction::FromModem).is_none() {
                break;
            }
        }
        prop_assert!(buf.len() <= noise.len());
    }
}

// Property: every received frame correlates to at least one name, without repeats
proptest! {
    #[test]
    fn prop_correlation_always_names(
        cmd1 in any::<u8>(),
        cmd2 in any::<u8>(),
        data in user_data(),
    ) {
        let names: Vec<&str> = CorrelationTable::global()
            .decode(cmd1, cmd2, data.as_ref(), Origin::Inbound)
            .collect();
        prop_assert!(!names.is_empty());
        let mut unique = names.clone();
        unique.sort_unstable();
        unique.dedup();
        prop_assert_eq!(unique.len(), names.len());
    }
}

fn device_command() -> impl Strategy<Value = Command> {
    (address(), 1u8..=255, any::<u8>(), any::<bool>()).prop_flat_map(|(address, group, byte, fast)| {
        prop_oneof![
            Just(Command::IdRequest { address }),
            Just(Command::Ping { address }),
            Just(Command::EngineVersion { address }),
            Just(Command::ProductDataRequest { address }),
            Just(Command::EnterLinkingMode { address, group }),
            Just(Command::On { address, group, level: byte, fast }),
            Just(Command::Off { address, group, fast }),
            Just(Command::GetOperatingFlags { address, request: byte }),
            Just(Command::ExtendedGet { address, group }),
            Just(Command::ReadAldb { address, mem_addr: 0x0FFF, num_records: 1 }),
            Just(Command::SetAddressMsb { address, msb: byte }),
            Just(Command::PeekOneByte { address, lsb: byte }),
        ]
    })
}

// Property: the echo of any encoded operation is published under that operation's name
proptest! {
    #[test]
    fn prop_encoded_operations_correlate(command in device_command()) {
        let echo = command.to_message().unwrap().with_ack(Ack::Ack);
        let topics = CorrelationTable::global().topics(&echo);
        prop_assert!(
            topics.iter().any(|topic| topic.name == command.name()),
            "{} not in {:?}", command.name(), topics
        );
        prop_assert!(topics.iter().all(|topic| topic.address == command.address()));
    }
}

// Property: a frame's own topics always match the exact pattern built from them
proptest! {
    #[test]
    fn prop_topics_match_their_own_pattern(message in inbound()) {
        for topic in CorrelationTable::global().topics(&message) {
            prop_assert!(TopicPattern::from(&topic).matches(&topic));
            prop_assert!(TopicPattern::any().matches(&topic));
        }
    }
}

// Property: a repeat with fewer hops inside the short window is always dropped,
// and any copy after the long window is always a new event
proptest! {
    #[test]
    fn prop_dedup_windows(
        first_hops in 1u8..4,
        drop_by in 1u8..4,
        early_ms in 0u64..700,
        late_ms in 2_000u64..10_000,
    ) {
        let clock = Arc::new(ManualClock::new());
        let mut dedup = BroadcastDeduplicator::new(DedupSettings::default(), clock.clone());
        let key = DedupKey {
            address: Address::new([0x11, 0x22, 0x33]),
            name: "on",
            group: Some(1),
        };
        let repeat_hops = first_hops.saturating_sub(drop_by);

        prop_assert!(dedup.admit(key.clone(), first_hops));
        clock.advance(Duration::from_millis(early_ms));
        prop_assert!(!dedup.admit(key.clone(), repeat_hops));
        clock.advance(Duration::from_millis(late_ms));
        prop_assert!(dedup.admit(key, repeat_hops));
    }
}

// Property: the flags byte keeps in-use, controller, both reserved bits and the
// used-before bit
proptest! {
    #[test]
    fn prop_record_flags_preserved(mem_addr in any::<u16>(), bytes in any::<[u8; 8]>()) {
        let record = AldbRecord::from_bytes(mem_addr, &bytes);
        prop_assert_eq!(record.flags(), bytes[0] & 0xF2);
        prop_assert_eq!(&record.to_bytes()[1..], &bytes[1..]);
        prop_assert_eq!(record.is_active(), record.in_use && !record.high_water_mark);
    }
}
