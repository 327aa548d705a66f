//
// Wire fixtures exercising the codec through its public API (`Message`
// encode/decode), rather than `message.rs`'s in-module tests, which reach
// straight into the message structs. Mirrors holo-bgp's `tests/packet/`
// layout: one file per message type, each pairing a literal byte fixture
// with the `Message` it should decode to / encode from.
//

use bytes::Bytes;

use bgpd::packet::message::{DecodeCxt, EncodeCxt, Message};

mod keepalive;
mod notification;
mod open;
mod route_refresh;
mod update;

pub fn test_encode_msg(bytes: &[u8], msg: &Message, cxt: &EncodeCxt) {
    let encoded = msg.encode(cxt);
    assert_eq!(encoded.as_ref(), bytes);
}

pub fn test_decode_msg(bytes: &[u8], msg: &Message, cxt: &DecodeCxt) {
    let mut buf = Bytes::copy_from_slice(bytes);
    let len = Message::peek_len(&buf[..19]).unwrap();
    assert_eq!(len as usize, bytes.len());
    let decoded = Message::decode(&mut buf, cxt).unwrap();
    assert_eq!(&decoded, msg);
}
