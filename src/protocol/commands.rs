//! Insteon command catalogue and typed outbound operations.
//!
//! [`DESCRIPTORS`] is the static table that maps command codes to operation names.
//! Several operations share a primary code; the secondary code and, for extended
//! messages, a predicate over user-data fields tell them apart.
//!
//! [`Command`] is the outbound side: one variant per operation with its parameters,
//! validated when the frame is built.

use crate::core::address::Address;
use crate::core::flags::MessageFlags;
use crate::core::message::{
    Body, InsteonMessage, LinkRecord, ManageAction, Message, MessageId, UserData,
};
use crate::error::{ProtocolError, Result};

/// Operation names, shared by the correlation table and subscribers.
pub mod names {
    pub const ASSIGN_TO_ALL_LINK_GROUP: &str = "assign_to_all_link_group";
    pub const DELETE_FROM_ALL_LINK_GROUP: &str = "delete_from_all_link_group";
    pub const PRODUCT_DATA_REQUEST: &str = "product_data_request";
    pub const DEVICE_TEXT_STRING_REQUEST: &str = "device_text_string_request";
    pub const ALL_LINK_CLEANUP_REPORT: &str = "all_link_cleanup_report";
    pub const ENTER_LINKING_MODE: &str = "enter_linking_mode";
    pub const ENTER_UNLINKING_MODE: &str = "enter_unlinking_mode";
    pub const GET_INSTEON_ENGINE_VERSION: &str = "get_insteon_engine_version";
    pub const PING: &str = "ping";
    pub const ID_REQUEST: &str = "id_request";
    pub const ON: &str = "on";
    pub const ON_FAST: &str = "on_fast";
    pub const OFF: &str = "off";
    pub const OFF_FAST: &str = "off_fast";
    pub const BRIGHT_ONE_STEP: &str = "bright_one_step";
    pub const DIM_ONE_STEP: &str = "dim_one_step";
    pub const START_MANUAL_CHANGE: &str = "start_manual_change";
    pub const STOP_MANUAL_CHANGE: &str = "stop_manual_change";
    pub const STATUS_REQUEST: &str = "status_request";
    pub const GET_OPERATING_FLAGS: &str = "get_operating_flags";
    pub const SET_OPERATING_FLAGS: &str = "set_operating_flags";
    pub const SET_ADDRESS_MSB: &str = "set_address_msb";
    pub const POKE_ONE_BYTE: &str = "poke_one_byte";
    pub const PEEK_ONE_BYTE: &str = "peek_one_byte";
    pub const EXTENDED_GET_SET: &str = "extended_get_set";
    pub const EXTENDED_GET_RESPONSE: &str = "extended_get_response";
    pub const READ_WRITE_ALDB: &str = "read_write_aldb";
    pub const ALDB_RECORD_RESPONSE: &str = "aldb_record_response";
    pub const BEEP: &str = "beep";

    /// Fallbacks when no table entry matches.
    pub const STANDARD_RECEIVED: &str = "standard_received";
    pub const EXTENDED_RECEIVED: &str = "extended_received";
    pub const SEND_STANDARD: &str = "send_standard";
    pub const SEND_EXTENDED: &str = "send_extended";
}

/// `(field, value)` pairs that must all hold in the user data, fields numbered 1..=14.
pub type FieldPredicate = &'static [(usize, u8)];

/// One row of the correlation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub cmd1: u8,
    /// `None` means cmd2 carries a parameter and matches anything.
    pub cmd2: Option<u8>,
    pub fields: Option<FieldPredicate>,
    /// Whether topics for this operation carry a group number.
    pub use_group: bool,
}

impl CommandDescriptor {
    const fn new(name: &'static str, cmd1: u8, cmd2: Option<u8>, use_group: bool) -> Self {
        Self {
            name,
            cmd1,
            cmd2,
            fields: None,
            use_group,
        }
    }

    const fn with_fields(mut self, fields: FieldPredicate) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Does a message with these codes denote this operation? `cmd1` is assumed equal.
    pub fn matches(&self, cmd2: u8, user_data: Option<&UserData>) -> bool {
        if self.cmd2.is_some_and(|expected| expected != cmd2) {
            return false;
        }
        match (self.fields, user_data) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(predicate), Some(data)) => predicate
                .iter()
                .all(|&(field, value)| data.get(field) == value),
        }
    }
}

/// The command catalogue. Generic entries come before the payload-specific ones that
/// share their codes.
pub const DESCRIPTORS: &[CommandDescriptor] = &[
    CommandDescriptor::new(names::ASSIGN_TO_ALL_LINK_GROUP, 0x01, None, true),
    CommandDescriptor::new(names::DELETE_FROM_ALL_LINK_GROUP, 0x02, None, true),
    CommandDescriptor::new(names::PRODUCT_DATA_REQUEST, 0x03, Some(0x00), false),
    CommandDescriptor::new(names::DEVICE_TEXT_STRING_REQUEST, 0x03, Some(0x02), false),
    CommandDescriptor::new(names::ALL_LINK_CLEANUP_REPORT, 0x06, None, true),
    CommandDescriptor::new(names::ENTER_LINKING_MODE, 0x09, None, true),
    CommandDescriptor::new(names::ENTER_UNLINKING_MODE, 0x0A, None, true),
    CommandDescriptor::new(names::GET_INSTEON_ENGINE_VERSION, 0x0D, None, false),
    CommandDescriptor::new(names::PING, 0x0F, None, false),
    CommandDescriptor::new(names::ID_REQUEST, 0x10, None, false),
    CommandDescriptor::new(names::ON, 0x11, None, true),
    CommandDescriptor::new(names::ON_FAST, 0x12, None, true),
    CommandDescriptor::new(names::OFF, 0x13, None, true),
    CommandDescriptor::new(names::OFF_FAST, 0x14, None, true),
    CommandDescriptor::new(names::BRIGHT_ONE_STEP, 0x15, None, true),
    CommandDescriptor::new(names::DIM_ONE_STEP, 0x16, None, true),
    CommandDescriptor::new(names::START_MANUAL_CHANGE, 0x17, None, true),
    CommandDescriptor::new(names::STOP_MANUAL_CHANGE, 0x18, None, true),
    CommandDescriptor::new(names::STATUS_REQUEST, 0x19, None, false),
    CommandDescriptor::new(names::GET_OPERATING_FLAGS, 0x1F, None, false),
    CommandDescriptor::new(names::SET_OPERATING_FLAGS, 0x20, None, false),
    CommandDescriptor::new(names::SET_ADDRESS_MSB, 0x28, None, false),
    CommandDescriptor::new(names::POKE_ONE_BYTE, 0x29, None, false),
    CommandDescriptor::new(names::PEEK_ONE_BYTE, 0x2B, None, false),
    CommandDescriptor::new(names::EXTENDED_GET_SET, 0x2E, None, true),
    CommandDescriptor::new(names::EXTENDED_GET_RESPONSE, 0x2E, Some(0x00), true)
        .with_fields(&[(2, 0x01)]),
    CommandDescriptor::new(names::READ_WRITE_ALDB, 0x2F, None, false),
    CommandDescriptor::new(names::ALDB_RECORD_RESPONSE, 0x2F, Some(0x00), false)
        .with_fields(&[(2, 0x01)]),
    CommandDescriptor::new(names::BEEP, 0x30, None, false),
];

/// First catalogue entry with this name.
pub fn descriptor(name: &str) -> Option<&'static CommandDescriptor> {
    DESCRIPTORS.iter().find(|d| d.name == name)
}

/// Build a direct 0x62 frame for `descriptor`.
///
/// `cmd2` is used only when the descriptor leaves the secondary code open.
pub fn encode(
    descriptor: &CommandDescriptor,
    address: Address,
    cmd2: u8,
    user_data: Option<UserData>,
) -> Message {
    Message::new(Body::Send(InsteonMessage {
        address,
        target: None,
        flags: MessageFlags::direct(user_data.is_some()),
        cmd1: descriptor.cmd1,
        cmd2: descriptor.cmd2.unwrap_or(cmd2),
        user_data,
    }))
}

fn encode_named(
    name: &'static str,
    address: Address,
    cmd2: u8,
    user_data: Option<UserData>,
) -> Result<Message> {
    let descriptor = descriptor(name)
        .ok_or_else(|| ProtocolError::invalid_field("operation", format!("unknown {name}")))?;
    Ok(encode(descriptor, address, cmd2, user_data))
}

/// Link mode byte for the modem's start-linking command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Responder,
    Controller,
    Either,
    Delete,
}

impl LinkMode {
    pub fn byte(self) -> u8 {
        match self {
            LinkMode::Responder => 0x00,
            LinkMode::Controller => 0x01,
            LinkMode::Either => 0x03,
            LinkMode::Delete => 0xFF,
        }
    }
}

/// Link-table memory addresses always end in `...7` or `...F`.
fn check_record_address(mem_addr: u16) -> Result<()> {
    if mem_addr & 0x0007 != 0x0007 {
        return Err(ProtocolError::invalid_field(
            "mem_addr",
            format!("{mem_addr:#06x} is not a record address"),
        ));
    }
    Ok(())
}

fn check_group(group: u8) -> Result<()> {
    if group == 0 {
        return Err(ProtocolError::invalid_field("group", "groups start at 1"));
    }
    Ok(())
}

/// A typed outbound operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    IdRequest { address: Address },
    Ping { address: Address },
    EngineVersion { address: Address },
    ProductDataRequest { address: Address },
    EnterLinkingMode { address: Address, group: u8 },
    EnterUnlinkingMode { address: Address, group: u8 },
    On { address: Address, group: u8, level: u8, fast: bool },
    Off { address: Address, group: u8, fast: bool },
    StatusRequest { address: Address, kind: u8 },
    GetOperatingFlags { address: Address, request: u8 },
    SetOperatingFlags { address: Address, flag: u8 },
    ExtendedGet { address: Address, group: u8 },
    /// `num_records` 0 streams the whole table, 1 reads one record.
    ReadAldb { address: Address, mem_addr: u16, num_records: u8 },
    WriteAldb { address: Address, mem_addr: u16, record: LinkRecord },
    SetAddressMsb { address: Address, msb: u8 },
    PeekOneByte { address: Address, lsb: u8 },
    PokeOneByte { address: Address, value: u8 },
    GetImInfo,
    GetImConfiguration,
    SetImConfiguration { flags: u8 },
    SendAllLink { group: u8, cmd1: u8, cmd2: u8 },
    StartAllLinking { mode: LinkMode, group: u8 },
    CancelAllLinking,
    GetFirstAllLinkRecord,
    GetNextAllLinkRecord,
    ManageAllLinkRecord { action: ManageAction, record: LinkRecord },
    ResetIm,
    LedOn,
    LedOff,
}

impl Command {
    /// Operation name, as it appears in topics for the echo and the reply.
    pub fn name(&self) -> &'static str {
        match self {
            Command::IdRequest { .. } => names::ID_REQUEST,
            Command::Ping { .. } => names::PING,
            Command::EngineVersion { .. } => names::GET_INSTEON_ENGINE_VERSION,
            Command::ProductDataRequest { .. } => names::PRODUCT_DATA_REQUEST,
            Command::EnterLinkingMode { .. } => names::ENTER_LINKING_MODE,
            Command::EnterUnlinkingMode { .. } => names::ENTER_UNLINKING_MODE,
            Command::On { fast: false, .. } => names::ON,
            Command::On { fast: true, .. } => names::ON_FAST,
            Command::Off { fast: false, .. } => names::OFF,
            Command::Off { fast: true, .. } => names::OFF_FAST,
            Command::StatusRequest { .. } => names::STATUS_REQUEST,
            Command::GetOperatingFlags { .. } => names::GET_OPERATING_FLAGS,
            Command::SetOperatingFlags { .. } => names::SET_OPERATING_FLAGS,
            Command::ExtendedGet { .. } => names::EXTENDED_GET_SET,
            Command::ReadAldb { .. } | Command::WriteAldb { .. } => names::READ_WRITE_ALDB,
            Command::SetAddressMsb { .. } => names::SET_ADDRESS_MSB,
            Command::PeekOneByte { .. } => names::PEEK_ONE_BYTE,
            Command::PokeOneByte { .. } => names::POKE_ONE_BYTE,
            Command::GetImInfo => MessageId::GetImInfo.name(),
            Command::GetImConfiguration => MessageId::GetImConfiguration.name(),
            Command::SetImConfiguration { .. } => MessageId::SetImConfiguration.name(),
            Command::SendAllLink { .. } => MessageId::SendAllLinkCommand.name(),
            Command::StartAllLinking { .. } => MessageId::StartAllLinking.name(),
            Command::CancelAllLinking => MessageId::CancelAllLinking.name(),
            Command::GetFirstAllLinkRecord => MessageId::GetFirstAllLinkRecord.name(),
            Command::GetNextAllLinkRecord => MessageId::GetNextAllLinkRecord.name(),
            Command::ManageAllLinkRecord { .. } => MessageId::ManageAllLinkRecord.name(),
            Command::ResetIm => MessageId::ResetIm.name(),
            Command::LedOn => MessageId::LedOn.name(),
            Command::LedOff => MessageId::LedOff.name(),
        }
    }

    /// Target device, `None` for commands handled by the modem itself.
    pub fn address(&self) -> Option<Address> {
        match self {
            Command::IdRequest { address }
            | Command::Ping { address }
            | Command::EngineVersion { address }
            | Command::ProductDataRequest { address }
            | Command::EnterLinkingMode { address, .. }
            | Command::EnterUnlinkingMode { address, .. }
            | Command::On { address, .. }
            | Command::Off { address, .. }
            | Command::StatusRequest { address, .. }
            | Command::GetOperatingFlags { address, .. }
            | Command::SetOperatingFlags { address, .. }
            | Command::ExtendedGet { address, .. }
            | Command::ReadAldb { address, .. }
            | Command::WriteAldb { address, .. }
            | Command::SetAddressMsb { address, .. }
            | Command::PeekOneByte { address, .. }
            | Command::PokeOneByte { address, .. } => Some(*address),
            _ => None,
        }
    }

    /// Device-directed commands wait for a direct ACK/NAK after the modem echo.
    pub fn expects_reply(&self) -> bool {
        self.address().is_some()
    }

    /// Name the device reply carries. `None` accepts any reply from the address:
    /// status replies put the link-database delta in cmd1.
    pub fn reply_name(&self) -> Option<&'static str> {
        match self {
            Command::StatusRequest { .. } => None,
            _ => Some(self.name()),
        }
    }

    /// Whether a modem NAK is worth a resend. For the link-record walk a NAK is the
    /// answer ("no more records"), not a transient refusal.
    pub fn retry_on_nak(&self) -> bool {
        !matches!(
            self,
            Command::GetFirstAllLinkRecord | Command::GetNextAllLinkRecord
        )
    }

    /// Validate parameters and build the outbound frame.
    pub fn to_message(&self) -> Result<Message> {
        let message = match *self {
            Command::IdRequest { address } => encode_named(names::ID_REQUEST, address, 0, None)?,
            Command::Ping { address } => encode_named(names::PING, address, 0, None)?,
            Command::EngineVersion { address } => {
                encode_named(names::GET_INSTEON_ENGINE_VERSION, address, 0, None)?
            }
            Command::ProductDataRequest { address } => {
                encode_named(names::PRODUCT_DATA_REQUEST, address, 0, None)?
            }
            Command::EnterLinkingMode { address, group } => {
                encode_named(names::ENTER_LINKING_MODE, address, group, None)?
            }
            Command::EnterUnlinkingMode { address, group } => {
                encode_named(names::ENTER_UNLINKING_MODE, address, group, None)?
            }
            Command::On {
                address,
                group,
                level,
                ..
            } => {
                check_group(group)?;
                encode_named(self.name(), address, level, group_payload(group))?
            }
            Command::Off { address, group, .. } => {
                check_group(group)?;
                encode_named(self.name(), address, 0, group_payload(group))?
            }
            Command::StatusRequest { address, kind } => {
                encode_named(names::STATUS_REQUEST, address, kind, None)?
            }
            Command::GetOperatingFlags { address, request } => {
                encode_named(names::GET_OPERATING_FLAGS, address, request, None)?
            }
            Command::SetOperatingFlags { address, flag } => {
                encode_named(names::SET_OPERATING_FLAGS, address, flag, None)?
            }
            Command::ExtendedGet { address, group } => {
                let data = UserData::from_fields(&[(1, group), (2, 0x00)]).with_checksum(0x2E, 0x00);
                encode_named(names::EXTENDED_GET_SET, address, 0x00, Some(data))?
            }
            Command::ReadAldb {
                address,
                mem_addr,
                num_records,
            } => {
                if num_records > 1 {
                    return Err(ProtocolError::invalid_field(
                        "num_records",
                        format!("{num_records} (expected 0 or 1)"),
                    ));
                }
                if mem_addr != 0 {
                    check_record_address(mem_addr)?;
                }
                let [hi, lo] = mem_addr.to_be_bytes();
                let data = UserData::from_fields(&[(2, 0x00), (3, hi), (4, lo), (5, num_records)])
                    .with_checksum(0x2F, 0x00);
                encode_named(names::READ_WRITE_ALDB, address, 0x00, Some(data))?
            }
            Command::WriteAldb {
                address,
                mem_addr,
                record,
            } => {
                check_record_address(mem_addr)?;
                let [hi, lo] = mem_addr.to_be_bytes();
                let [t1, t2, t3] = record.target.bytes();
                let [d1, d2, d3] = record.data;
                let data = UserData::from_fields(&[
                    (2, 0x02),
                    (3, hi),
                    (4, lo),
                    (5, 0x08),
                    (6, record.flags),
                    (7, record.group),
                    (8, t1),
                    (9, t2),
                    (10, t3),
                    (11, d1),
                    (12, d2),
                    (13, d3),
                ])
                .with_checksum(0x2F, 0x00);
                encode_named(names::READ_WRITE_ALDB, address, 0x00, Some(data))?
            }
            Command::SetAddressMsb { address, msb } => {
                encode_named(names::SET_ADDRESS_MSB, address, msb, None)?
            }
            Command::PeekOneByte { address, lsb } => {
                encode_named(names::PEEK_ONE_BYTE, address, lsb, None)?
            }
            Command::PokeOneByte { address, value } => {
                encode_named(names::POKE_ONE_BYTE, address, value, None)?
            }
            Command::GetImInfo => Message::new(Body::GetImInfo(None)),
            Command::GetImConfiguration => Message::new(Body::GetImConfiguration(None)),
            Command::SetImConfiguration { flags } => Message::new(Body::CommandByte {
                id: MessageId::SetImConfiguration,
                value: flags,
            }),
            Command::SendAllLink { group, cmd1, cmd2 } => {
                check_group(group)?;
                Message::new(Body::SendAllLink { group, cmd1, cmd2 })
            }
            Command::StartAllLinking { mode, group } => Message::new(Body::StartAllLinking {
                link_code: mode.byte(),
                group,
            }),
            Command::CancelAllLinking => Message::new(Body::Bare(MessageId::CancelAllLinking)),
            Command::GetFirstAllLinkRecord => {
                Message::new(Body::Bare(MessageId::GetFirstAllLinkRecord))
            }
            Command::GetNextAllLinkRecord => {
                Message::new(Body::Bare(MessageId::GetNextAllLinkRecord))
            }
            Command::ManageAllLinkRecord { action, record } => {
                Message::new(Body::ManageRecord { action, record })
            }
            Command::ResetIm => Message::new(Body::Bare(MessageId::ResetIm)),
            Command::LedOn => Message::new(Body::Bare(MessageId::LedOn)),
            Command::LedOff => Message::new(Body::Bare(MessageId::LedOff)),
        };
        Ok(message)
    }
}

/// Multi-group devices address groups other than 1 through an extended payload.
fn group_payload(group: u8) -> Option<UserData> {
    (group != 1).then(|| UserData::from_fields(&[(1, group)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: Address = Address::new([0x1a, 0x2b, 0x3c]);

    #[test]
    fn test_on_encodes_level_in_cmd2() {
        let msg = Command::On {
            address: ADDR,
            group: 1,
            level: 0xFF,
            fast: false,
        }
        .to_message()
        .unwrap();
        assert_eq!(
            &msg.to_bytes()[..],
            &[0x02, 0x62, 0x1a, 0x2b, 0x3c, 0x0F, 0x11, 0xFF]
        );
    }

    #[test]
    fn test_on_for_other_group_is_extended() {
        let msg = Command::On {
            address: ADDR,
            group: 3,
            level: 0x80,
            fast: true,
        }
        .to_message()
        .unwrap();
        let insteon = msg.insteon().unwrap();
        assert_eq!(insteon.cmd1, 0x12);
        assert_eq!(insteon.user_data.unwrap().get(1), 3);
        assert!(msg.to_bytes().len() == 22);
    }

    #[test]
    fn test_read_aldb_payload() {
        let msg = Command::ReadAldb {
            address: ADDR,
            mem_addr: 0x0FFF,
            num_records: 1,
        }
        .to_message()
        .unwrap();
        let data = msg.insteon().unwrap().user_data.unwrap();
        assert_eq!(data.get(2), 0x00);
        assert_eq!(data.get(3), 0x0F);
        assert_eq!(data.get(4), 0xFF);
        assert_eq!(data.get(5), 0x01);
        assert!(data.has_valid_checksum(0x2F, 0x00));
    }

    #[test]
    fn test_validation_rejects_bad_fields() {
        assert!(matches!(
            Command::ReadAldb {
                address: ADDR,
                mem_addr: 0x0FF0,
                num_records: 1
            }
            .to_message(),
            Err(ProtocolError::InvalidField { field: "mem_addr", .. })
        ));
        assert!(Command::ReadAldb {
            address: ADDR,
            mem_addr: 0x0FFF,
            num_records: 5
        }
        .to_message()
        .is_err());
        assert!(Command::Off {
            address: ADDR,
            group: 0,
            fast: false
        }
        .to_message()
        .is_err());
    }

    #[test]
    fn test_predicate_requires_user_data() {
        let response = descriptor(names::ALDB_RECORD_RESPONSE).unwrap();
        assert!(!response.matches(0x00, None));
        assert!(response.matches(0x00, Some(&UserData::from_fields(&[(2, 0x01)]))));
        assert!(!response.matches(0x00, Some(&UserData::from_fields(&[(2, 0x02)]))));
        assert!(!response.matches(0x01, Some(&UserData::from_fields(&[(2, 0x01)]))));
    }

    #[test]
    fn test_descriptor_names_unique() {
        for (i, a) in DESCRIPTORS.iter().enumerate() {
            for b in &DESCRIPTORS[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }
}
