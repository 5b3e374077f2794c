#![no_main]

use bytes::BytesMut;
use insteon_protocol::core::codec::decode_frame;
use insteon_protocol::core::message::Direction;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Both directions must resync on garbage without panicking or looping
    for direction in [Direction::FromModem, Direction::ToModem] {
        let mut buf = BytesMut::from(data);
        while !buf.is_empty() {
            let before = buf.len();
            if decode_frame(&mut buf, direction).is_none() || buf.len() == before {
                break;
            }
        }
    }
});
