//! One link-database record and its 8-byte on-device layout.

use crate::core::address::Address;
use crate::core::message::{LinkRecord, UserData};
use crate::error::{ProtocolError, Result};
use std::fmt;

/// Bytes per record; record addresses step down by this much.
pub const RECORD_LEN: u16 = 8;

const IN_USE: u8 = 0x80;
const CONTROLLER: u8 = 0x40;
const BIT5: u8 = 0x20;
const BIT4: u8 = 0x10;
/// Set once the slot has ever held a record. A clear bit marks the high-water mark.
const USED_BEFORE: u8 = 0x02;

/// A link-database record at a fixed memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AldbRecord {
    pub mem_addr: u16,
    pub in_use: bool,
    /// Controller when set, responder otherwise.
    pub controller: bool,
    pub high_water_mark: bool,
    pub bit5: bool,
    pub bit4: bool,
    pub group: u8,
    pub target: Address,
    pub data: [u8; 3],
}

impl AldbRecord {
    /// A fresh in-use record.
    pub fn new(mem_addr: u16, controller: bool, group: u8, target: Address, data: [u8; 3]) -> Self {
        Self {
            mem_addr,
            in_use: true,
            controller,
            high_water_mark: false,
            bit5: false,
            bit4: false,
            group,
            target,
            data,
        }
    }

    /// The end-of-table marker.
    pub fn high_water_mark_at(mem_addr: u16) -> Self {
        Self {
            mem_addr,
            in_use: false,
            controller: false,
            high_water_mark: true,
            bit5: false,
            bit4: false,
            group: 0,
            target: Address::ZERO,
            data: [0; 3],
        }
    }

    /// In use and not the end marker.
    pub fn is_active(&self) -> bool {
        self.in_use && !self.high_water_mark
    }

    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.in_use {
            flags |= IN_USE;
        }
        if self.controller {
            flags |= CONTROLLER;
        }
        if self.bit5 {
            flags |= BIT5;
        }
        if self.bit4 {
            flags |= BIT4;
        }
        if !self.high_water_mark {
            flags |= USED_BEFORE;
        }
        flags
    }

    pub fn from_flags(mem_addr: u16, flags: u8, group: u8, target: Address, data: [u8; 3]) -> Self {
        Self {
            mem_addr,
            in_use: flags & IN_USE != 0,
            controller: flags & CONTROLLER != 0,
            high_water_mark: flags & USED_BEFORE == 0,
            bit5: flags & BIT5 != 0,
            bit4: flags & BIT4 != 0,
            group,
            target,
            data,
        }
    }

    /// Parse the on-device byte layout: flags, group, target (3), data (3).
    pub fn from_bytes(mem_addr: u16, bytes: &[u8; 8]) -> Self {
        let target = Address::new([bytes[2], bytes[3], bytes[4]]);
        Self::from_flags(
            mem_addr,
            bytes[0],
            bytes[1],
            target,
            [bytes[5], bytes[6], bytes[7]],
        )
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let [t1, t2, t3] = self.target.bytes();
        let [d1, d2, d3] = self.data;
        [self.flags(), self.group, t1, t2, t3, d1, d2, d3]
    }

    pub fn from_link_record(mem_addr: u16, record: &LinkRecord) -> Self {
        Self::from_flags(mem_addr, record.flags, record.group, record.target, record.data)
    }

    pub fn to_link_record(&self) -> LinkRecord {
        LinkRecord {
            flags: self.flags(),
            group: self.group,
            target: self.target,
            data: self.data,
        }
    }

    /// Parse an extended record response: address in D3/D4, record in D6..D13.
    pub fn from_user_data(data: &UserData) -> Result<Self> {
        if data.get(2) != 0x01 {
            return Err(ProtocolError::invalid_field(
                "D2",
                format!("{:#04x} is not a record response", data.get(2)),
            ));
        }
        let mem_addr = u16::from_be_bytes([data.get(3), data.get(4)]);
        let mut bytes = [0u8; 8];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = data.get(6 + i);
        }
        Ok(Self::from_bytes(mem_addr, &bytes))
    }

    /// Whether `other` describes the same link (role, group and target).
    pub fn same_link(&self, controller: bool, group: u8, target: Address) -> bool {
        self.controller == controller && self.group == group && self.target == target
    }
}

impl fmt::Display for AldbRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high_water_mark {
            return write!(f, "{:04x}: HWM", self.mem_addr);
        }
        write!(
            f,
            "{:04x}: {} {} grp {:3} {} data {:02x} {:02x} {:02x}",
            self.mem_addr,
            if self.in_use { "A" } else { "U" },
            if self.controller { "CTRL" } else { "RESP" },
            self.group,
            self.target,
            self.data[0],
            self.data[1],
            self.data[2]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits() {
        let record = AldbRecord::from_flags(0x0FFF, 0xE2, 1, Address::new([1, 2, 3]), [0; 3]);
        assert!(record.in_use);
        assert!(record.controller);
        assert!(record.bit5);
        assert!(!record.bit4);
        assert!(!record.high_water_mark);
        assert_eq!(record.flags(), 0xE2);

        let hwm = AldbRecord::from_flags(0x0FF7, 0x00, 0, Address::ZERO, [0; 3]);
        assert!(hwm.high_water_mark);
        assert!(!hwm.is_active());
        assert_eq!(hwm, AldbRecord::high_water_mark_at(0x0FF7));
    }

    #[test]
    fn test_record_response_payload() {
        let data = UserData::from_fields(&[
            (2, 0x01),
            (3, 0x0F),
            (4, 0xEF),
            (6, 0xA2),
            (7, 0x01),
            (8, 0x44),
            (9, 0x85),
            (10, 0x11),
            (11, 0xFF),
            (12, 0x1F),
            (13, 0x01),
        ]);
        let record = AldbRecord::from_user_data(&data).unwrap();
        assert_eq!(record.mem_addr, 0x0FEF);
        assert!(record.in_use && !record.controller);
        assert_eq!(record.group, 1);
        assert_eq!(record.target, Address::new([0x44, 0x85, 0x11]));
        assert_eq!(record.data, [0xFF, 0x1F, 0x01]);
        assert_eq!(record.to_bytes(), [0xA2, 0x01, 0x44, 0x85, 0x11, 0xFF, 0x1F, 0x01]);

        assert!(AldbRecord::from_user_data(&UserData::from_fields(&[(2, 0x02)])).is_err());
    }
}
