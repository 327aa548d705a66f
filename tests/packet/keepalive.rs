use std::sync::LazyLock;

use bgpd::packet::message::{DecodeCxt, EncodeCxt, KeepaliveMsg, Message};

use super::{test_decode_msg, test_encode_msg};

// KEEPALIVE carries no body: header alone, 19 bytes total.
static KEEPALIVE1: LazyLock<(Vec<u8>, Message)> = LazyLock::new(|| {
    #[rustfmt::skip]
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0x00, 0x13,
        0x04,
    ];
    (bytes, Message::Keepalive(KeepaliveMsg))
});

#[test]
fn test_encode_keepalive1() {
    let (bytes, msg) = &*KEEPALIVE1;
    test_encode_msg(bytes, msg, &EncodeCxt::default());
}

#[test]
fn test_decode_keepalive1() {
    let (bytes, msg) = &*KEEPALIVE1;
    test_decode_msg(bytes, msg, &DecodeCxt::default());
}
