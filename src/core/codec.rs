//! Tokio codec for the modem byte stream.
//!
//! The stream carries no length prefix and no delimiter beyond the leading `0x02`
//! marker, so the frame length is looked up from the message id (and, for carrier
//! frames, the extended bit of the flags byte). Bytes that do not start a known frame
//! are skipped so a corrupted stream resynchronises on the next marker.

use crate::core::flags::MessageFlags;
use crate::core::message::{Direction, Message, MessageId, NAK_BYTE, START_BYTE};
use crate::error::{ProtocolError, Result};
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

/// Frame codec for one side of the modem link.
#[derive(Debug, Clone, Copy)]
pub struct ModemCodec {
    direction: Direction,
}

impl ModemCodec {
    /// Codec used by the host: decodes modem output including command echoes.
    pub fn host() -> Self {
        Self {
            direction: Direction::FromModem,
        }
    }

    /// Codec used by a simulated modem: decodes what the host writes.
    pub fn modem() -> Self {
        Self {
            direction: Direction::ToModem,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl Default for ModemCodec {
    fn default() -> Self {
        Self::host()
    }
}

/// Length of the frame at the head of `buf`, if enough bytes are buffered to know it.
///
/// `buf` must start with the marker and a known id.
fn pending_frame_len(id: MessageId, buf: &[u8], direction: Direction) -> Option<Option<usize>> {
    if id.frame_len(direction, false).is_none() {
        return Some(None);
    }
    let extended = match id.flags_offset() {
        Some(offset) => match buf.get(offset) {
            Some(flags) => MessageFlags::is_extended_byte(*flags),
            None => return None,
        },
        None => false,
    };
    Some(id.frame_len(direction, extended))
}

/// Pop one frame from the front of `buf`.
///
/// Returns `None` and leaves `buf` untouched when the head frame is incomplete;
/// calling again with the same bytes gives the same answer. Leading garbage is
/// discarded.
pub fn decode_frame(buf: &mut BytesMut, direction: Direction) -> Option<Message> {
    loop {
        let skip = buf.iter().position(|b| *b == START_BYTE).unwrap_or(buf.len());
        if skip > 0 {
            if buf[..skip].iter().all(|b| *b == NAK_BYTE) {
                debug!(count = skip, "Modem not ready (bare NAK)");
            } else {
                warn!(count = skip, "Discarding bytes before frame marker");
            }
            buf.advance(skip);
        }

        if buf.len() < 2 {
            return None;
        }

        let Some(id) = MessageId::from_byte(buf[1]) else {
            warn!(id = buf[1], "Unknown message id, resyncing");
            buf.advance(1);
            continue;
        };

        let len = match pending_frame_len(id, buf, direction) {
            None => return None,
            Some(None) => {
                warn!(%id, ?direction, "Message id not valid in this direction, resyncing");
                buf.advance(1);
                continue;
            }
            Some(Some(len)) => len,
        };

        if buf.len() < len {
            buf.reserve(len - buf.len());
            return None;
        }

        let frame = buf.split_to(len);
        match Message::parse(&frame, direction) {
            Ok(message) => {
                trace!(%id, len, "Decoded frame");
                return Some(message);
            }
            Err(e) => {
                warn!(%id, error = %e, "Dropping malformed frame");
            }
        }
    }
}

impl Decoder for ModemCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        Ok(decode_frame(src, self.direction))
    }
}

impl Encoder<Message> for ModemCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        item.write(dst);
        Ok(())
    }
}

impl Encoder<&Message> for ModemCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<()> {
        item.write(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::{Ack, Body};

    #[test]
    fn test_skips_garbage_and_bare_nak() {
        let mut buf = BytesMut::from(&[0x15, 0xFF, 0x02, 0x6A, 0x06][..]);
        let msg = decode_frame(&mut buf, Direction::FromModem).unwrap();
        assert_eq!(msg.body, Body::Bare(MessageId::GetNextAllLinkRecord));
        assert_eq!(msg.ack, Some(Ack::Ack));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_id_resyncs_on_next_marker() {
        let mut buf = BytesMut::from(&[0x02, 0x99, 0x02, 0x55][..]);
        let msg = decode_frame(&mut buf, Direction::FromModem).unwrap();
        assert_eq!(msg.body, Body::Bare(MessageId::UserResetDetected));
    }

    #[test]
    fn test_waits_for_flags_byte() {
        let mut buf = BytesMut::from(&[0x02, 0x62, 0x11, 0x22][..]);
        assert!(decode_frame(&mut buf, Direction::FromModem).is_none());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_host_side_rejects_inbound_ids_from_modem_side() {
        // 0x50 never travels host -> modem; the modem-side codec skips it
        let mut buf = BytesMut::from(&[0x02, 0x50, 0x02, 0x69][..]);
        let msg = decode_frame(&mut buf, Direction::ToModem).unwrap();
        assert_eq!(msg.body, Body::Bare(MessageId::GetFirstAllLinkRecord));
        assert_eq!(msg.ack, None);
    }
}
