//! Concurrent use of one connection from many tasks.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::*;
use insteon_protocol::aldb::{AldbManager, AldbStatus};
use insteon_protocol::core::address::Address;
use insteon_protocol::core::flags::MessageType;
use insteon_protocol::core::message::{Body, Message};
use insteon_protocol::protocol::{Command, EventBus, EventKind, Topic, TopicPattern};
use insteon_protocol::service::{Connection, Coordinator};
use insteon_protocol::transport::MemoryTransport;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;

fn device(n: u8) -> Address {
    Address::new([0x20, 0x00, n])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_each_get_their_own_reply() {
    let (transport, peer) = MemoryTransport::new();
    let _written = spawn_modem(peer, |frame| match sent_to(frame) {
        Some(insteon) => vec![ack(frame), direct_ack(insteon.address, insteon.cmd1, insteon.cmd2)],
        None => vec![ack(frame)],
    });
    let coordinator = Coordinator::new(Connection::open(transport, &fast_config()));

    let mut tasks = JoinSet::new();
    for n in 1..=16u8 {
        let coordinator = coordinator.clone();
        tasks.spawn(async move {
            let command = Command::On {
                address: device(n),
                group: 1,
                level: n,
                fast: false,
            };
            let response = coordinator.send(&command).await.unwrap();
            let reply = response.reply.unwrap();
            let insteon = reply.insteon().unwrap();
            assert_eq!(insteon.address, device(n));
            assert_eq!(insteon.cmd2, n);
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    let metrics = coordinator.connection().metrics().snapshot();
    assert!(metrics.frames_sent >= 16);
    assert_eq!(metrics.timeouts, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_loads_of_different_devices() {
    let first = device(1);
    let second = device(2);
    let image = |flags: u8| {
        let mut image = BTreeMap::new();
        image.insert(0x0FFF, [flags, 0x01, 0x44, 0x85, 0x11, 0x00, 0x00, 0x00]);
        image.insert(0x0FF7, [flags, 0x02, 0x44, 0x85, 0x11, 0x00, 0x00, 0x00]);
        image.insert(0x0FEF, [0x00; 8]);
        image
    };
    let mut a = aldb_device(first, image(0xE2));
    let mut b = aldb_device(second, image(0xA2));
    let (transport, peer) = MemoryTransport::new();
    let _written = spawn_modem(peer, move |frame| match sent_to(frame) {
        Some(insteon) if insteon.address == first => a(frame),
        Some(_) => b(frame),
        None => vec![ack(frame)],
    });
    let manager = Arc::new(AldbManager::new(Coordinator::new(Connection::open(
        transport,
        &fast_config(),
    ))));

    let loads = [first, second].map(|address| {
        let manager = manager.clone();
        tokio::spawn(async move {
            let aldb = manager.device(address).unwrap();
            manager.load(&aldb).await.unwrap()
        })
    });
    for load in loads {
        assert_eq!(load.await.unwrap(), AldbStatus::Loaded);
    }

    let a = manager.device(first).unwrap().snapshot().unwrap();
    let b = manager.device(second).unwrap().snapshot().unwrap();
    assert!(a.active().all(|record| record.controller));
    assert!(b.active().all(|record| !record.controller));
    assert_eq!(a.active().count(), 2);
    assert_eq!(b.active().count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn loads_of_one_table_are_serialised() {
    let mut image = BTreeMap::new();
    image.insert(0x0FFF, [0xE2, 0x01, 0x44, 0x85, 0x11, 0x00, 0x00, 0x00]);
    image.insert(0x0FF7, [0x00; 8]);
    let (transport, peer) = MemoryTransport::new();
    let _written = spawn_modem(peer, aldb_device(DIMMER, image));
    let manager = Arc::new(AldbManager::new(Coordinator::new(Connection::open(
        transport,
        &fast_config(),
    ))));

    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let manager = manager.clone();
        tasks.spawn(async move {
            let aldb = manager.device(DIMMER).unwrap();
            manager.load(&aldb).await.unwrap()
        });
    }
    while let Some(status) = tasks.join_next().await {
        assert_eq!(status.unwrap(), AldbStatus::Loaded);
    }
    assert_eq!(manager.device(DIMMER).unwrap().snapshot().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn bus_subscribe_and_publish_from_many_threads() {
    let bus = EventBus::new();
    let topic = Topic {
        address: Some(DIMMER),
        group: Some(1),
        name: "on",
        kind: EventKind::Insteon(MessageType::AllLinkBroadcast),
    };
    let message = Arc::new(Message::new(Body::ButtonEvent(0x02)));

    let mut subscribers = JoinSet::new();
    for _ in 0..8 {
        let mut subscription = bus.subscribe(TopicPattern::from(&topic)).unwrap();
        subscribers.spawn(async move {
            let mut seen = 0;
            while seen < 100 {
                subscription.recv().await.unwrap();
                seen += 1;
            }
            seen
        });
    }

    let mut publishers = JoinSet::new();
    for _ in 0..4 {
        let bus = bus.clone();
        let topic = topic.clone();
        let message = message.clone();
        publishers.spawn(async move {
            for _ in 0..25 {
                assert_eq!(bus.publish(&[topic.clone()], message.clone()).unwrap(), 8);
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(result) = publishers.join_next().await {
        result.unwrap();
    }
    while let Some(seen) = subscribers.join_next().await {
        assert_eq!(seen.unwrap(), 100);
    }
    assert_eq!(bus.subscriber_count(), 0);
}
