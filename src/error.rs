//! # Error Types
//!
//! Error handling for the Insteon protocol engine.
//!
//! This module defines every error variant that can surface from the engine, from
//! low-level I/O failures on the modem link up to link-database state violations.
//!
//! ## Error Categories
//! - **I/O Errors**: serial/TCP transport failures
//! - **Framing Errors**: malformed addresses or frames handed to the codec API
//! - **Correlation Errors**: timeouts and NAKs while waiting for a reply
//! - **ALDB Errors**: per-record write failures, writes against an unloaded table
//! - **Configuration Errors**: invalid TOML or out-of-range settings
//!
//! Incomplete frames are *not* errors: the codec simply waits for more bytes.
//! Correlation misses are never raised either; they degrade to a fallback name.
//!
//! ## Example Usage
//! ```rust
//! use insteon_protocol::error::{ProtocolError, Result};
//! use insteon_protocol::core::address::Address;
//!
//! fn parse(text: &str) -> Result<Address> {
//!     text.parse::<Address>()
//! }
//!
//! assert!(parse("1a.2b.3c").is_ok());
//! assert!(matches!(parse("zz"), Err(ProtocolError::Decode(_))));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Event bus errors
    pub const ERR_BUS_LOCK: &str = "Failed to acquire event bus lock";

    /// Deduplication errors
    pub const ERR_DEDUP_LOCK: &str = "Failed to acquire deduplication lock";

    /// Queue errors
    pub const ERR_QUEUE_LOCK: &str = "Failed to acquire write queue lock";

    /// Link database errors
    pub const ERR_ALDB_LOCK: &str = "Failed to acquire link database lock";
    pub const ERR_NO_HIGH_WATER_MARK: &str = "Link database has no high-water-mark record";
    pub const ERR_NO_SUCH_RECORD: &str = "No link record at memory address";

    /// Framing errors
    pub const ERR_INVALID_ADDRESS: &str = "Invalid Insteon address";
    pub const ERR_UNKNOWN_MESSAGE_ID: &str = "Unknown modem message id";
}

/// ProtocolError is the primary error type for all engine operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("No command matched cmd1={cmd1:#04x} cmd2={cmd2:#04x}")]
    CorrelationMiss { cmd1: u8, cmd2: u8 },

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Timeout occurred")]
    Timeout,

    #[error("{operation} rejected with NAK")]
    Nak { operation: &'static str },

    #[error("Link record write failed at {mem_addr:#06x}: {reason}")]
    AldbWrite { mem_addr: u16, reason: String },

    #[error("Link database is {status}, expected loaded")]
    InvalidTableState { status: String },

    #[error("Link database error: {0}")]
    Aldb(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Shorthand for encode-time validation failures.
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
