//! # Link Database (ALDB) Synchronisation
//!
//! Every Insteon device, and the modem itself, keeps an All-Link Database of the
//! links it takes part in. This module mirrors those tables in memory, reads them
//! from the device, stages edits and writes them back.
//!
//! ## Components
//! - **Record**: one 8-byte link record and its control-flag bits
//! - **Table**: ordered records, derived load status, pending changes
//! - **Reader**: extended, peek and modem read strategies as lazy streams
//! - **Writer**: modem manage-record, extended write and poke write strategies
//! - **Manager**: per-device handles, engine detection, serialised load/write
//!
//! ## Control Flags
//! ```text
//! bit 7  in use
//! bit 6  controller (clear: responder)
//! bit 5  reserved
//! bit 4  reserved
//! bit 1  used before (clear: high-water mark)
//! ```

use crate::core::address::Address;
use std::fmt;

pub mod manager;
pub mod reader;
pub mod record;
pub mod table;
pub mod writer;

pub use manager::{AldbManager, DeviceAldb, EngineVersion};
pub use record::AldbRecord;
pub use table::{Aldb, AldbStatus, LinkEntry, PendingChange, PendingKey};
pub use writer::WriteSummary;

/// Whose link database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AldbTarget {
    Modem,
    Device(Address),
}

impl fmt::Display for AldbTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AldbTarget::Modem => f.write_str("modem"),
            AldbTarget::Device(address) => write!(f, "{address}"),
        }
    }
}
