//! Insteon message flags.
//!
//! ```text
//!  bit 7..5   message type
//!  bit 4      extended (14 bytes of user data follow cmd2)
//!  bit 3..2   hops left
//!  bit 1..0   max hops
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type carried in the top three bits of the flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Direct = 0,
    DirectAck = 1,
    AllLinkCleanup = 2,
    AllLinkCleanupAck = 3,
    Broadcast = 4,
    DirectNak = 5,
    AllLinkBroadcast = 6,
    AllLinkCleanupNak = 7,
}

impl MessageType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => MessageType::Direct,
            1 => MessageType::DirectAck,
            2 => MessageType::AllLinkCleanup,
            3 => MessageType::AllLinkCleanupAck,
            4 => MessageType::Broadcast,
            5 => MessageType::DirectNak,
            6 => MessageType::AllLinkBroadcast,
            _ => MessageType::AllLinkCleanupNak,
        }
    }

    /// Topic segment for this type.
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Direct => "direct",
            MessageType::DirectAck => "direct_ack",
            MessageType::AllLinkCleanup => "all_link_cleanup",
            MessageType::AllLinkCleanupAck => "all_link_cleanup_ack",
            MessageType::Broadcast => "broadcast",
            MessageType::DirectNak => "direct_nak",
            MessageType::AllLinkBroadcast => "all_link_broadcast",
            MessageType::AllLinkCleanupNak => "all_link_cleanup_nak",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        (0..8)
            .map(MessageType::from_bits)
            .find(|kind| kind.name() == name)
    }

    /// Types that the mesh repeats and that therefore go through deduplication.
    pub fn is_repeated(self) -> bool {
        matches!(
            self,
            MessageType::Broadcast | MessageType::AllLinkBroadcast | MessageType::AllLinkCleanup
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageFlags {
    pub message_type: MessageType,
    pub extended: bool,
    pub hops_left: u8,
    pub max_hops: u8,
}

impl MessageFlags {
    /// Default hop budget for outbound messages.
    pub const DEFAULT_HOPS: u8 = 3;

    pub fn new(message_type: MessageType, extended: bool) -> Self {
        Self {
            message_type,
            extended,
            hops_left: Self::DEFAULT_HOPS,
            max_hops: Self::DEFAULT_HOPS,
        }
    }

    pub fn direct(extended: bool) -> Self {
        Self::new(MessageType::Direct, extended)
    }

    pub fn with_hops(mut self, hops_left: u8, max_hops: u8) -> Self {
        self.hops_left = hops_left & 0x03;
        self.max_hops = max_hops & 0x03;
        self
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            message_type: MessageType::from_bits(byte >> 5),
            extended: byte & 0x10 != 0,
            hops_left: (byte >> 2) & 0x03,
            max_hops: byte & 0x03,
        }
    }

    pub fn to_byte(self) -> u8 {
        ((self.message_type as u8) << 5)
            | if self.extended { 0x10 } else { 0 }
            | ((self.hops_left & 0x03) << 2)
            | (self.max_hops & 0x03)
    }

    /// Extended bit of a raw flags byte, used by the codec before full decoding.
    pub const fn is_extended_byte(byte: u8) -> bool {
        byte & 0x10 != 0
    }
}

impl From<u8> for MessageFlags {
    fn from(byte: u8) -> Self {
        Self::from_byte(byte)
    }
}

impl From<MessageFlags> for u8 {
    fn from(flags: MessageFlags) -> Self {
        flags.to_byte()
    }
}
