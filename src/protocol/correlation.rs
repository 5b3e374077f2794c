//! Command correlation: turning received codes back into operation names.
//!
//! The table is indexed by cmd1 once. [`CorrelationTable::decode`] yields every entry
//! that accepts the codes, or a single fallback name when none do, so subscribers
//! always get at least one topic per frame.

use crate::core::address::Address;
use crate::core::flags::MessageType;
use crate::core::message::{Ack, Body, InsteonMessage, Message, UserData};
use crate::protocol::commands::{names, CommandDescriptor, DESCRIPTORS};
use crate::protocol::topic::{EventKind, Topic};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::slice;
use tracing::debug;

static TABLE: Lazy<CorrelationTable> = Lazy::new(CorrelationTable::build);

/// Which fallback applies when nothing matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Received over the powerline (0x50/0x51).
    Inbound,
    /// Echo of a frame the host sent (0x62).
    Echo,
}

impl Origin {
    fn fallback(self, extended: bool) -> &'static str {
        match (self, extended) {
            (Origin::Inbound, false) => names::STANDARD_RECEIVED,
            (Origin::Inbound, true) => names::EXTENDED_RECEIVED,
            (Origin::Echo, false) => names::SEND_STANDARD,
            (Origin::Echo, true) => names::SEND_EXTENDED,
        }
    }
}

/// Descriptors grouped by cmd1.
#[derive(Debug)]
pub struct CorrelationTable {
    by_cmd1: HashMap<u8, Vec<&'static CommandDescriptor>>,
}

impl CorrelationTable {
    fn build() -> Self {
        let mut by_cmd1: HashMap<u8, Vec<&'static CommandDescriptor>> = HashMap::new();
        for descriptor in DESCRIPTORS {
            by_cmd1.entry(descriptor.cmd1).or_default().push(descriptor);
        }
        Self { by_cmd1 }
    }

    /// The shared table.
    pub fn global() -> &'static Self {
        &TABLE
    }

    /// Names of every operation matching the codes, falling back when none do.
    pub fn decode<'a>(
        &'a self,
        cmd1: u8,
        cmd2: u8,
        user_data: Option<&'a UserData>,
        origin: Origin,
    ) -> Matches<'a> {
        let candidates = self
            .by_cmd1
            .get(&cmd1)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter();
        Matches {
            candidates,
            cmd2,
            user_data,
            matched: false,
            fallback: Some(origin.fallback(user_data.is_some())),
        }
    }

    /// Whether topics for `name` carry a group.
    pub fn use_group(&self, name: &str) -> bool {
        self.by_cmd1
            .values()
            .flatten()
            .any(|descriptor| descriptor.name == name && descriptor.use_group)
    }

    /// Group number for a carrier message, if `name` is grouped.
    pub fn group_for(&self, name: &str, message: &InsteonMessage) -> Option<u8> {
        if !self.use_group(name) {
            return None;
        }
        match message.flags.message_type {
            MessageType::Direct => Some(message.user_data.map_or(1, |data| data.get(1))),
            MessageType::AllLinkCleanup => Some(message.cmd2),
            MessageType::Broadcast | MessageType::AllLinkBroadcast => {
                message.target.map(|target| target.low())
            }
            _ => None,
        }
    }

    /// Every topic a frame publishes under.
    pub fn topics(&self, message: &Message) -> Vec<Topic> {
        match &message.body {
            Body::Received(insteon) => {
                let kind = EventKind::Insteon(insteon.flags.message_type);
                self.carrier_topics(insteon, Origin::Inbound, kind)
            }
            Body::Send(insteon) => {
                let kind = match message.ack {
                    Some(Ack::Ack) => EventKind::Ack,
                    Some(Ack::Nak) => EventKind::Nak,
                    None => EventKind::Insteon(insteon.flags.message_type),
                };
                self.carrier_topics(insteon, Origin::Echo, kind)
            }
            body => {
                let id = body.id();
                let kind = match message.ack {
                    Some(Ack::Ack) => EventKind::Ack,
                    Some(Ack::Nak) => EventKind::Nak,
                    None => EventKind::Received,
                };
                let group = match body {
                    Body::AllLinkComplete { group, .. }
                    | Body::CleanupFailure { group, .. }
                    | Body::SendAllLink { group, .. } => Some(*group),
                    _ => None,
                };
                vec![Topic {
                    address: modem_frame_address(body),
                    group,
                    name: id.name(),
                    kind,
                }]
            }
        }
    }

    fn carrier_topics(&self, insteon: &InsteonMessage, origin: Origin, kind: EventKind) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self
            .decode(insteon.cmd1, insteon.cmd2, insteon.user_data.as_ref(), origin)
            .map(|name| Topic {
                address: Some(insteon.address),
                group: self.group_for(name, insteon),
                name,
                kind,
            })
            .collect();
        if topics.len() == 1 && is_fallback(topics[0].name) {
            debug!(
                cmd1 = insteon.cmd1,
                cmd2 = insteon.cmd2,
                address = %insteon.address,
                "No command matched, using fallback name"
            );
        }
        topics.dedup();
        topics
    }
}

/// Device address carried by a modem frame that reports on a specific device.
fn modem_frame_address(body: &Body) -> Option<Address> {
    match body {
        Body::AllLinkComplete { address, .. } | Body::CleanupFailure { address, .. } => {
            Some(*address)
        }
        _ => None,
    }
}

pub fn is_fallback(name: &str) -> bool {
    matches!(
        name,
        names::STANDARD_RECEIVED | names::EXTENDED_RECEIVED | names::SEND_STANDARD | names::SEND_EXTENDED
    )
}

/// Lazy iterator over matching operation names.
#[derive(Debug, Clone)]
pub struct Matches<'a> {
    candidates: slice::Iter<'a, &'static CommandDescriptor>,
    cmd2: u8,
    user_data: Option<&'a UserData>,
    matched: bool,
    fallback: Option<&'static str>,
}

impl Iterator for Matches<'_> {
    type Item = &'static str;

    fn next(&mut self) -> Option<Self::Item> {
        for descriptor in self.candidates.by_ref() {
            if descriptor.matches(self.cmd2, self.user_data) {
                self.matched = true;
                return Some(descriptor.name);
            }
        }
        if self.matched {
            None
        } else {
            self.fallback.take()
        }
    }
}
