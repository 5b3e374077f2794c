//! # Core Protocol Components
//!
//! Low-level frame handling for the modem link.
//!
//! ## Components
//! - **Address**: 3-byte device identifiers
//! - **Flags**: Insteon message type, extended bit and hop counts
//! - **Message**: typed view of every modem frame
//! - **Codec**: Tokio codec for framing the modem byte stream
//!
//! ## Wire Format
//! ```text
//! [0x02] [Id(1)] [Payload(N)] [Ack(0|1)]
//! ```
//!
//! `N` is fixed per id and direction except for Insteon carrier frames, which add 14
//! bytes of user data when the flags' extended bit is set. Host commands come back
//! from the modem with a trailing ACK (0x06) or NAK (0x15).

pub mod address;
pub mod codec;
pub mod flags;
pub mod message;
