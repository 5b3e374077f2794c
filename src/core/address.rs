//! Insteon device addresses.
//!
//! Every powerline/RF device carries a fixed 3-byte identifier printed on its label.
//! The modem reports addresses most-significant byte first and the engine keeps that
//! order everywhere.

use crate::error::{constants, ProtocolError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 3-byte Insteon device address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 3]);

impl Address {
    /// All-zero address, used as the "unset" target in link records.
    pub const ZERO: Address = Address([0, 0, 0]);

    pub const fn new(bytes: [u8; 3]) -> Self {
        Self(bytes)
    }

    /// Build an address from the first three bytes of a slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [a, b, c, ..] => Ok(Self([*a, *b, *c])),
            _ => Err(ProtocolError::Decode(format!(
                "{}: need 3 bytes, got {}",
                constants::ERR_INVALID_ADDRESS,
                bytes.len()
            ))),
        }
    }

    pub const fn bytes(&self) -> [u8; 3] {
        self.0
    }

    pub const fn high(&self) -> u8 {
        self.0[0]
    }

    pub const fn middle(&self) -> u8 {
        self.0[1]
    }

    /// Low byte. Broadcast frames carry the group number here.
    pub const fn low(&self) -> u8 {
        self.0[2]
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0, 0, 0]
    }

    /// Compact lowercase hex form (`1a2b3c`), used as a topic segment.
    pub fn id(&self) -> String {
        format!("{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}.{:02x}.{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl From<[u8; 3]> for Address {
    fn from(bytes: [u8; 3]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = ProtocolError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 3 {
            return Err(ProtocolError::Decode(format!(
                "{}: need 3 bytes, got {}",
                constants::ERR_INVALID_ADDRESS,
                bytes.len()
            )));
        }
        Self::from_slice(bytes)
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    /// Accepts `1a2b3c`, `1a.2b.3c`, `1A:2B:3C` and `1a 2b 3c`.
    fn from_str(s: &str) -> Result<Self> {
        let digits: String = s
            .chars()
            .filter(|c| !matches!(c, '.' | ':' | ' ' | '-'))
            .collect();

        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ProtocolError::Decode(format!(
                "{}: '{s}'",
                constants::ERR_INVALID_ADDRESS
            )));
        }

        let mut bytes = [0u8; 3];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).map_err(|e| {
                ProtocolError::Decode(format!("{}: {e}", constants::ERR_INVALID_ADDRESS))
            })?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
