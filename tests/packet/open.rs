use std::collections::BTreeSet;
use std::sync::LazyLock;

use bgpd::packet::capability::Capability;
use bgpd::packet::message::{DecodeCxt, EncodeCxt, Message, OpenMsg};

use super::{test_decode_msg, test_encode_msg};

// No optional parameters at all: the minimal legal OPEN.
static OPEN1: LazyLock<(Vec<u8>, Message)> = LazyLock::new(|| {
    #[rustfmt::skip]
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0x00, 0x1d,
        0x01,
        0x04,             // version
        0xfd, 0xe9,       // my_as: 65001
        0x00, 0xb4,       // holdtime: 180
        0xc0, 0x00, 0x02, 0x01, // identifier: 192.0.2.1
        0x00,             // opt params length
    ];
    let open = OpenMsg {
        version: 4,
        my_as: 65001,
        holdtime: 180,
        identifier: "192.0.2.1".parse().unwrap(),
        capabilities: BTreeSet::new(),
    };
    (bytes, Message::Open(open))
});

// One capability (ASN4), wrapped in a normal (non-extended) Capabilities
// optional parameter (spec.md §4.E).
static OPEN2: LazyLock<(Vec<u8>, Message)> = LazyLock::new(|| {
    #[rustfmt::skip]
    let bytes = vec![
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0x00, 0x25,
        0x01,
        0x04,             // version
        0x5b, 0xa0,       // my_as: AS_TRANS (23456)
        0x00, 0xb4,       // holdtime: 180
        0xc0, 0x00, 0x02, 0x01, // identifier: 192.0.2.1
        0x08,             // opt params length
        0x02, 0x06,       // param type 2 (Capabilities), length 6
        0x41, 0x04,       // capability code 65 (FourOctetAsNumber), length 4
        0xfa, 0x56, 0xea, 0x00, // asn: 4_200_000_000
    ];
    let open = OpenMsg {
        version: 4,
        my_as: 23456,
        holdtime: 180,
        identifier: "192.0.2.1".parse().unwrap(),
        capabilities: BTreeSet::from([Capability::FourOctetAsNumber { asn: 4_200_000_000 }]),
    };
    (bytes, Message::Open(open))
});

#[test]
fn test_encode_open1() {
    let (bytes, msg) = &*OPEN1;
    test_encode_msg(bytes, msg, &EncodeCxt::default());
}

#[test]
fn test_decode_open1() {
    let (bytes, msg) = &*OPEN1;
    test_decode_msg(bytes, msg, &DecodeCxt::default());
}

#[test]
fn test_encode_open2() {
    let (bytes, msg) = &*OPEN2;
    test_encode_msg(bytes, msg, &EncodeCxt::default());
}

#[test]
fn test_decode_open2() {
    let (bytes, msg) = &*OPEN2;
    test_decode_msg(bytes, msg, &DecodeCxt::default());
}

#[test]
fn test_open2_real_as_prefers_asn4_capability() {
    let (_, msg) = &*OPEN2;
    let Message::Open(open) = msg else { unreachable!() };
    assert_eq!(open.real_as(), 4_200_000_000);
}

// RFC 9072 extended optional parameters: same capability set as OPEN2, but
// wrapped in the 255/u16-length/real-type form instead of the classic
// u8-length one.
#[test]
fn extended_opt_params_use_255_marker() {
    let open = OpenMsg {
        version: 4,
        my_as: 23456,
        holdtime: 180,
        identifier: "192.0.2.1".parse().unwrap(),
        capabilities: BTreeSet::from([Capability::FourOctetAsNumber { asn: 4_200_000_000 }]),
    };
    let mut cxt = EncodeCxt::default();
    cxt.extended_opt_params = true;
    let encoded = Message::Open(open.clone()).encode(&cxt);
    // version(1) + my_as(2) + holdtime(2) + identifier(4) + opt_len(1) = 10
    // bytes of fixed header before the opt params themselves begin.
    assert_eq!(encoded[19 + 10], 255);
    let mut bytes = encoded.freeze();
    let decoded = Message::decode(&mut bytes, &DecodeCxt::default()).unwrap();
    assert_eq!(decoded, Message::Open(open));
}
