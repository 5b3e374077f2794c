//! Modem frames.
//!
//! Every frame starts with the `0x02` marker followed by a one-byte message id. The
//! payload length is fixed per id and direction; only the Insteon carrier frames
//! (`0x50`, `0x51`, `0x62`) depend on the extended bit of their flags byte. Frames the
//! host sends are echoed back by the modem with one extra trailing ACK/NAK byte,
//! which is kept on the decoded [`Message`] as [`Ack`].

use crate::core::address::Address;
use crate::core::flags::MessageFlags;
use crate::error::{constants, ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Leading marker byte of every frame.
pub const START_BYTE: u8 = 0x02;
/// Modem acknowledgement byte.
pub const ACK_BYTE: u8 = 0x06;
/// Modem negative acknowledgement byte.
pub const NAK_BYTE: u8 = 0x15;
/// Number of user-data bytes in an extended message.
pub const USER_DATA_LEN: usize = 14;

/// Which side produced the bytes being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Modem output as seen by the host: inbound frames plus echoes with ack byte.
    FromModem,
    /// Host output as seen by the modem: plain commands, no ack byte.
    ToModem,
}

/// Modem message ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageId {
    StandardReceived = 0x50,
    ExtendedReceived = 0x51,
    X10Received = 0x52,
    AllLinkComplete = 0x53,
    ButtonEventReport = 0x54,
    UserResetDetected = 0x55,
    AllLinkCleanupFailureReport = 0x56,
    AllLinkRecordResponse = 0x57,
    AllLinkCleanupStatusReport = 0x58,
    GetImInfo = 0x60,
    SendAllLinkCommand = 0x61,
    SendStandard = 0x62,
    SendX10 = 0x63,
    StartAllLinking = 0x64,
    CancelAllLinking = 0x65,
    SetHostDeviceCategory = 0x66,
    ResetIm = 0x67,
    SetAckMessageByte = 0x68,
    GetFirstAllLinkRecord = 0x69,
    GetNextAllLinkRecord = 0x6A,
    SetImConfiguration = 0x6B,
    GetAllLinkRecordForSender = 0x6C,
    LedOn = 0x6D,
    LedOff = 0x6E,
    ManageAllLinkRecord = 0x6F,
    SetNakMessageByte = 0x70,
    SetAckMessageTwoBytes = 0x71,
    RfSleep = 0x72,
    GetImConfiguration = 0x73,
}

impl MessageId {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use MessageId::*;
        let id = match byte {
            0x50 => StandardReceived,
            0x51 => ExtendedReceived,
            0x52 => X10Received,
            0x53 => AllLinkComplete,
            0x54 => ButtonEventReport,
            0x55 => UserResetDetected,
            0x56 => AllLinkCleanupFailureReport,
            0x57 => AllLinkRecordResponse,
            0x58 => AllLinkCleanupStatusReport,
            0x60 => GetImInfo,
            0x61 => SendAllLinkCommand,
            0x62 => SendStandard,
            0x63 => SendX10,
            0x64 => StartAllLinking,
            0x65 => CancelAllLinking,
            0x66 => SetHostDeviceCategory,
            0x67 => ResetIm,
            0x68 => SetAckMessageByte,
            0x69 => GetFirstAllLinkRecord,
            0x6A => GetNextAllLinkRecord,
            0x6B => SetImConfiguration,
            0x6C => GetAllLinkRecordForSender,
            0x6D => LedOn,
            0x6E => LedOff,
            0x6F => ManageAllLinkRecord,
            0x70 => SetNakMessageByte,
            0x71 => SetAckMessageTwoBytes,
            0x72 => RfSleep,
            0x73 => GetImConfiguration,
            _ => return None,
        };
        Some(id)
    }

    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Ids in the 0x60 range are host commands; the modem only ever echoes them.
    pub fn is_command(self) -> bool {
        self.byte() >= 0x60
    }

    /// Topic name for frames that are not Insteon carrier messages.
    pub fn name(self) -> &'static str {
        use MessageId::*;
        match self {
            StandardReceived => "standard_received",
            ExtendedReceived => "extended_received",
            X10Received => "x10_received",
            AllLinkComplete => "all_link_complete",
            ButtonEventReport => "button_event_report",
            UserResetDetected => "user_reset_detected",
            AllLinkCleanupFailureReport => "all_link_cleanup_failure_report",
            AllLinkRecordResponse => "all_link_record_response",
            AllLinkCleanupStatusReport => "all_link_cleanup_status_report",
            GetImInfo => "get_im_info",
            SendAllLinkCommand => "send_all_link_command",
            SendStandard => "send_standard",
            SendX10 => "send_x10",
            StartAllLinking => "start_all_linking",
            CancelAllLinking => "cancel_all_linking",
            SetHostDeviceCategory => "set_host_device_category",
            ResetIm => "reset_im",
            SetAckMessageByte => "set_ack_message_byte",
            GetFirstAllLinkRecord => "get_first_all_link_record",
            GetNextAllLinkRecord => "get_next_all_link_record",
            SetImConfiguration => "set_im_configuration",
            GetAllLinkRecordForSender => "get_all_link_record_for_sender",
            LedOn => "led_on",
            LedOff => "led_off",
            ManageAllLinkRecord => "manage_all_link_record",
            SetNakMessageByte => "set_nak_message_byte",
            SetAckMessageTwoBytes => "set_ack_message_two_bytes",
            RfSleep => "rf_sleep",
            GetImConfiguration => "get_im_configuration",
        }
    }

    /// Total frame length including the marker and, for echoes, the ack byte.
    ///
    /// `extended` only matters for the carrier frames. Returns `None` for ids that
    /// never travel in `direction`.
    pub fn frame_len(self, direction: Direction, extended: bool) -> Option<usize> {
        use MessageId::*;
        let carrier_extra = if extended { USER_DATA_LEN } else { 0 };
        match direction {
            Direction::FromModem => Some(match self {
                StandardReceived | ExtendedReceived => 11 + carrier_extra,
                X10Received => 4,
                AllLinkComplete => 10,
                ButtonEventReport => 3,
                UserResetDetected => 2,
                AllLinkCleanupFailureReport => 7,
                AllLinkRecordResponse => 10,
                AllLinkCleanupStatusReport => 3,
                GetImInfo => 9,
                SendStandard => 9 + carrier_extra,
                GetImConfiguration => 6,
                command => command.frame_len(Direction::ToModem, false)? + 1,
            }),
            Direction::ToModem => match self {
                GetImInfo | CancelAllLinking | ResetIm | GetFirstAllLinkRecord
                | GetNextAllLinkRecord | GetAllLinkRecordForSender | LedOn | LedOff | RfSleep
                | GetImConfiguration => Some(2),
                SetAckMessageByte | SetImConfiguration | SetNakMessageByte => Some(3),
                SendX10 | StartAllLinking | SetAckMessageTwoBytes => Some(4),
                SendAllLinkCommand | SetHostDeviceCategory => Some(5),
                SendStandard => Some(8 + carrier_extra),
                ManageAllLinkRecord => Some(11),
                _ => None,
            },
        }
    }

    /// Offset of the flags byte for frames whose length depends on it.
    pub fn flags_offset(self) -> Option<usize> {
        match self {
            MessageId::StandardReceived | MessageId::ExtendedReceived => Some(8),
            MessageId::SendStandard => Some(5),
            _ => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#04x})", self.name(), self.byte())
    }
}

/// Trailing status byte on modem echoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ack {
    Ack,
    Nak,
}

impl Ack {
    pub fn from_byte(byte: u8) -> Self {
        if byte == ACK_BYTE {
            Ack::Ack
        } else {
            Ack::Nak
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Ack::Ack => ACK_BYTE,
            Ack::Nak => NAK_BYTE,
        }
    }
}

/// The 14 user-data bytes `D1..D14` of an extended message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UserData([u8; USER_DATA_LEN]);

impl UserData {
    pub const fn new(bytes: [u8; USER_DATA_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from `(field, value)` pairs, fields numbered 1..=14.
    pub fn from_fields(fields: &[(usize, u8)]) -> Self {
        let mut data = Self::default();
        for &(field, value) in fields {
            data.set(field, value);
        }
        data
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; USER_DATA_LEN] = bytes.try_into().map_err(|_| {
            ProtocolError::Decode(format!(
                "user data needs {USER_DATA_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Field `D<n>`; out-of-range fields read as zero.
    pub fn get(&self, field: usize) -> u8 {
        match field {
            1..=USER_DATA_LEN => self.0[field - 1],
            _ => 0,
        }
    }

    pub fn set(&mut self, field: usize, value: u8) {
        if (1..=USER_DATA_LEN).contains(&field) {
            self.0[field - 1] = value;
        }
    }

    pub fn as_bytes(&self) -> &[u8; USER_DATA_LEN] {
        &self.0
    }

    /// Two's-complement checksum over cmd1, cmd2 and D1..D13.
    pub fn checksum(cmd1: u8, cmd2: u8, data: &[u8]) -> u8 {
        let sum = data
            .iter()
            .take(USER_DATA_LEN - 1)
            .fold(cmd1.wrapping_add(cmd2), |acc, b| acc.wrapping_add(*b));
        (!sum).wrapping_add(1)
    }

    /// Store the checksum in D14.
    pub fn with_checksum(mut self, cmd1: u8, cmd2: u8) -> Self {
        self.0[USER_DATA_LEN - 1] = Self::checksum(cmd1, cmd2, &self.0);
        self
    }

    pub fn has_valid_checksum(&self, cmd1: u8, cmd2: u8) -> bool {
        self.0[USER_DATA_LEN - 1] == Self::checksum(cmd1, cmd2, &self.0)
    }
}

impl fmt::Debug for UserData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserData(")?;
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        f.write_str(")")
    }
}

/// An Insteon carrier message: the part of 0x50/0x51/0x62 frames that crosses the
/// powerline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsteonMessage {
    /// Sender for received frames, destination for sent frames.
    pub address: Address,
    /// Receiver of a received frame (the modem, or a group number for broadcasts).
    pub target: Option<Address>,
    pub flags: MessageFlags,
    pub cmd1: u8,
    pub cmd2: u8,
    pub user_data: Option<UserData>,
}

impl InsteonMessage {
    pub fn is_extended(&self) -> bool {
        self.user_data.is_some()
    }
}

/// Link record as stored in the modem database (0x57 / 0x6F payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRecord {
    pub flags: u8,
    pub group: u8,
    pub target: Address,
    pub data: [u8; 3],
}

impl LinkRecord {
    fn write(&self, out: &mut BytesMut) {
        out.put_u8(self.flags);
        out.put_u8(self.group);
        out.put_slice(&self.target.bytes());
        out.put_slice(&self.data);
    }

    fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(ProtocolError::Decode("link record needs 8 bytes".into()));
        }
        Ok(Self {
            flags: bytes[0],
            group: bytes[1],
            target: Address::from_slice(&bytes[2..5])?,
            data: [bytes[5], bytes[6], bytes[7]],
        })
    }
}

/// Action byte of the modem's manage-record command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManageAction {
    FindFirst,
    FindNext,
    ModifyFirstOrAdd,
    ModifyFirstControllerOrAdd,
    ModifyFirstResponderOrAdd,
    DeleteFirst,
}

impl ManageAction {
    pub fn byte(self) -> u8 {
        match self {
            ManageAction::FindFirst => 0x00,
            ManageAction::FindNext => 0x01,
            ManageAction::ModifyFirstOrAdd => 0x20,
            ManageAction::ModifyFirstControllerOrAdd => 0x40,
            ManageAction::ModifyFirstResponderOrAdd => 0x41,
            ManageAction::DeleteFirst => 0x80,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => ManageAction::FindFirst,
            0x01 => ManageAction::FindNext,
            0x20 => ManageAction::ModifyFirstOrAdd,
            0x40 => ManageAction::ModifyFirstControllerOrAdd,
            0x41 => ManageAction::ModifyFirstResponderOrAdd,
            0x80 => ManageAction::DeleteFirst,
            _ => return None,
        })
    }
}

/// Identity reported by the modem in the get-info echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImInfo {
    pub address: Address,
    pub category: u8,
    pub subcategory: u8,
    pub firmware: u8,
}

/// Frame payload, one variant per frame shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// 0x50 / 0x51
    Received(InsteonMessage),
    /// 0x62
    Send(InsteonMessage),
    /// 0x53
    AllLinkComplete {
        link_code: u8,
        group: u8,
        address: Address,
        category: u8,
        subcategory: u8,
        firmware: u8,
    },
    /// 0x54
    ButtonEvent(u8),
    /// 0x56
    CleanupFailure { group: u8, address: Address },
    /// 0x57
    AllLinkRecord(LinkRecord),
    /// 0x60: empty when sent, filled in on the echo.
    GetImInfo(Option<ImInfo>),
    /// 0x61
    SendAllLink { group: u8, cmd1: u8, cmd2: u8 },
    /// 0x64
    StartAllLinking { link_code: u8, group: u8 },
    /// 0x6F
    ManageRecord {
        action: ManageAction,
        record: LinkRecord,
    },
    /// 0x73: configuration byte only present on the echo.
    GetImConfiguration(Option<u8>),
    /// Commands with a single argument byte (0x68, 0x6B, 0x70).
    CommandByte { id: MessageId, value: u8 },
    /// Payload-less frames (0x55, 0x58, 0x65, 0x67, 0x69, 0x6A, 0x6C, 0x6D, 0x6E, 0x72).
    Bare(MessageId),
    /// Frames carried through without interpretation (X10, host category, two-byte ack).
    Opaque { id: MessageId, payload: Bytes },
}

impl Body {
    pub fn id(&self) -> MessageId {
        match self {
            Body::Received(msg) if msg.is_extended() => MessageId::ExtendedReceived,
            Body::Received(_) => MessageId::StandardReceived,
            Body::Send(_) => MessageId::SendStandard,
            Body::AllLinkComplete { .. } => MessageId::AllLinkComplete,
            Body::ButtonEvent(_) => MessageId::ButtonEventReport,
            Body::CleanupFailure { .. } => MessageId::AllLinkCleanupFailureReport,
            Body::AllLinkRecord(_) => MessageId::AllLinkRecordResponse,
            Body::GetImInfo(_) => MessageId::GetImInfo,
            Body::SendAllLink { .. } => MessageId::SendAllLinkCommand,
            Body::StartAllLinking { .. } => MessageId::StartAllLinking,
            Body::ManageRecord { .. } => MessageId::ManageAllLinkRecord,
            Body::GetImConfiguration(_) => MessageId::GetImConfiguration,
            Body::CommandByte { id, .. } | Body::Bare(id) | Body::Opaque { id, .. } => *id,
        }
    }
}

/// A decoded modem frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Body,
    /// Echo status for host commands, cleanup status for 0x58 reports.
    pub ack: Option<Ack>,
}

impl Message {
    pub fn new(body: Body) -> Self {
        Self { body, ack: None }
    }

    pub fn with_ack(mut self, ack: Ack) -> Self {
        self.ack = Some(ack);
        self
    }

    /// Strip the echo status, yielding the frame the host originally sent.
    pub fn without_ack(&self) -> Self {
        Self {
            body: self.body.clone(),
            ack: None,
        }
    }

    pub fn id(&self) -> MessageId {
        self.body.id()
    }

    pub fn is_nak(&self) -> bool {
        self.ack == Some(Ack::Nak)
    }

    /// Whether this frame is the modem's echo of `sent`. Info requests come back with
    /// their data filled in; everything else is echoed verbatim.
    pub fn echoes(&self, sent: &Message) -> bool {
        if self.ack.is_none() {
            return false;
        }
        match (&sent.body, &self.body) {
            (Body::GetImInfo(_), Body::GetImInfo(_))
            | (Body::GetImConfiguration(_), Body::GetImConfiguration(_)) => true,
            (sent, echoed) => sent == echoed,
        }
    }

    /// Carrier part of 0x50/0x51/0x62 frames.
    pub fn insteon(&self) -> Option<&InsteonMessage> {
        match &self.body {
            Body::Received(msg) | Body::Send(msg) => Some(msg),
            _ => None,
        }
    }

    /// Wire bytes, including the ack byte when present.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(32);
        self.write(&mut out);
        out.freeze()
    }

    /// Append wire bytes to `out`.
    pub fn write(&self, out: &mut BytesMut) {
        out.put_u8(START_BYTE);
        out.put_u8(self.id().byte());
        match &self.body {
            Body::Received(msg) => {
                out.put_slice(&msg.address.bytes());
                out.put_slice(&msg.target.unwrap_or_default().bytes());
                write_carrier_tail(msg, out);
            }
            Body::Send(msg) => {
                out.put_slice(&msg.address.bytes());
                write_carrier_tail(msg, out);
            }
            Body::AllLinkComplete {
                link_code,
                group,
                address,
                category,
                subcategory,
                firmware,
            } => {
                out.put_u8(*link_code);
                out.put_u8(*group);
                out.put_slice(&address.bytes());
                out.put_slice(&[*category, *subcategory, *firmware]);
            }
            Body::ButtonEvent(event) => out.put_u8(*event),
            Body::CleanupFailure { group, address } => {
                out.put_u8(0x01);
                out.put_u8(*group);
                out.put_slice(&address.bytes());
            }
            Body::AllLinkRecord(record) => record.write(out),
            Body::GetImInfo(info) => {
                if let Some(info) = info {
                    out.put_slice(&info.address.bytes());
                    out.put_slice(&[info.category, info.subcategory, info.firmware]);
                }
            }
            Body::SendAllLink { group, cmd1, cmd2 } => out.put_slice(&[*group, *cmd1, *cmd2]),
            Body::StartAllLinking { link_code, group } => out.put_slice(&[*link_code, *group]),
            Body::ManageRecord { action, record } => {
                out.put_u8(action.byte());
                record.write(out);
            }
            Body::GetImConfiguration(config) => {
                if let Some(config) = config {
                    out.put_slice(&[*config, 0x00, 0x00]);
                }
            }
            Body::CommandByte { value, .. } => out.put_u8(*value),
            Body::Bare(_) => {}
            Body::Opaque { payload, .. } => out.put_slice(payload),
        }
        if let Some(ack) = self.ack {
            out.put_u8(ack.byte());
        }
    }

    /// Parse one complete frame. `frame` starts at the marker and has exactly the
    /// length reported by [`MessageId::frame_len`].
    pub fn parse(frame: &[u8], direction: Direction) -> Result<Self> {
        if frame.len() < 2 || frame[0] != START_BYTE {
            return Err(ProtocolError::Decode("frame must start with 0x02".into()));
        }
        let id = MessageId::from_byte(frame[1]).ok_or_else(|| {
            ProtocolError::Decode(format!(
                "{} {:#04x}",
                constants::ERR_UNKNOWN_MESSAGE_ID,
                frame[1]
            ))
        })?;

        let extended = id
            .flags_offset()
            .and_then(|offset| frame.get(offset))
            .is_some_and(|flags| MessageFlags::is_extended_byte(*flags));
        let expected = id.frame_len(direction, extended).ok_or_else(|| {
            ProtocolError::Decode(format!("{id} does not travel {direction:?}"))
        })?;
        if frame.len() != expected {
            return Err(ProtocolError::Decode(format!(
                "{id} frame needs {expected} bytes, got {}",
                frame.len()
            )));
        }

        let echoed = direction == Direction::FromModem && id.is_command();
        let (payload, ack) = if echoed || id == MessageId::AllLinkCleanupStatusReport {
            let (payload, last) = frame[2..].split_at(frame.len() - 3);
            (payload, Some(Ack::from_byte(last[0])))
        } else {
            (&frame[2..], None)
        };

        let body = match id {
            MessageId::StandardReceived | MessageId::ExtendedReceived => {
                let flags = MessageFlags::from_byte(payload[6]);
                Body::Received(InsteonMessage {
                    address: Address::from_slice(&payload[0..3])?,
                    target: Some(Address::from_slice(&payload[3..6])?),
                    flags,
                    cmd1: payload[7],
                    cmd2: payload[8],
                    user_data: carrier_user_data(flags, &payload[9..])?,
                })
            }
            MessageId::SendStandard => {
                let flags = MessageFlags::from_byte(payload[3]);
                Body::Send(InsteonMessage {
                    address: Address::from_slice(&payload[0..3])?,
                    target: None,
                    flags,
                    cmd1: payload[4],
                    cmd2: payload[5],
                    user_data: carrier_user_data(flags, &payload[6..])?,
                })
            }
            MessageId::AllLinkComplete => Body::AllLinkComplete {
                link_code: payload[0],
                group: payload[1],
                address: Address::from_slice(&payload[2..5])?,
                category: payload[5],
                subcategory: payload[6],
                firmware: payload[7],
            },
            MessageId::ButtonEventReport => Body::ButtonEvent(payload[0]),
            MessageId::AllLinkCleanupFailureReport => Body::CleanupFailure {
                group: payload[1],
                address: Address::from_slice(&payload[2..5])?,
            },
            MessageId::AllLinkRecordResponse => Body::AllLinkRecord(LinkRecord::read(payload)?),
            MessageId::GetImInfo => Body::GetImInfo(if payload.len() >= 6 {
                Some(ImInfo {
                    address: Address::from_slice(&payload[0..3])?,
                    category: payload[3],
                    subcategory: payload[4],
                    firmware: payload[5],
                })
            } else {
                None
            }),
            MessageId::SendAllLinkCommand => Body::SendAllLink {
                group: payload[0],
                cmd1: payload[1],
                cmd2: payload[2],
            },
            MessageId::StartAllLinking => Body::StartAllLinking {
                link_code: payload[0],
                group: payload[1],
            },
            MessageId::ManageAllLinkRecord => Body::ManageRecord {
                action: ManageAction::from_byte(payload[0]).ok_or_else(|| {
                    ProtocolError::Decode(format!("unknown manage action {:#04x}", payload[0]))
                })?,
                record: LinkRecord::read(&payload[1..])?,
            },
            MessageId::GetImConfiguration => Body::GetImConfiguration(payload.first().copied()),
            MessageId::SetAckMessageByte
            | MessageId::SetImConfiguration
            | MessageId::SetNakMessageByte => Body::CommandByte {
                id,
                value: payload[0],
            },
            MessageId::UserResetDetected
            | MessageId::AllLinkCleanupStatusReport
            | MessageId::CancelAllLinking
            | MessageId::ResetIm
            | MessageId::GetFirstAllLinkRecord
            | MessageId::GetNextAllLinkRecord
            | MessageId::GetAllLinkRecordForSender
            | MessageId::LedOn
            | MessageId::LedOff
            | MessageId::RfSleep => Body::Bare(id),
            MessageId::X10Received
            | MessageId::SendX10
            | MessageId::SetHostDeviceCategory
            | MessageId::SetAckMessageTwoBytes => Body::Opaque {
                id,
                payload: Bytes::copy_from_slice(payload),
            },
        };

        Ok(Self { body, ack })
    }
}

fn write_carrier_tail(msg: &InsteonMessage, out: &mut BytesMut) {
    let mut flags = msg.flags;
    flags.extended = msg.user_data.is_some();
    out.put_u8(flags.to_byte());
    out.put_u8(msg.cmd1);
    out.put_u8(msg.cmd2);
    if let Some(data) = &msg.user_data {
        out.put_slice(data.as_bytes());
    }
}

fn carrier_user_data(flags: MessageFlags, rest: &[u8]) -> Result<Option<UserData>> {
    if flags.extended {
        UserData::from_slice(&rest[..USER_DATA_LEN]).map(Some)
    } else {
        Ok(None)
    }
}
