use bgpd::packet::attribute::{Attributes, MpUnreachNlri, Origin};
use bgpd::packet::message::{DecodeCxt, EncodeCxt, Message, UpdateMsg};
use bgpd::packet::nlri::{Action, Family, Nlri, NlriData};
use ipnetwork::{Ipv4Network, Ipv6Network};

fn roundtrip(update: UpdateMsg) -> UpdateMsg {
    let message = Message::Update(update);
    let encoded = message.encode(&EncodeCxt::default());
    let mut bytes = encoded.freeze();
    let Message::Update(decoded) =
        Message::decode(&mut bytes, &DecodeCxt::default()).unwrap()
    else {
        panic!("decoded message changed type");
    };
    decoded
}

// A single UPDATE carrying both a withdrawal and an announcement must
// preserve the withdrawn-routes-before-reachable-routes ordering on the
// wire (`UpdateMsg::encode` lays out WITHDRAWN_ROUTES before
// NLRI unconditionally), and round-trip back to the same two routes.
#[test]
fn withdraw_and_announce_share_one_update() {
    let update = UpdateMsg {
        withdrawn: vec![Nlri {
            family: Family::IPV4_UNICAST,
            action: Action::Withdraw,
            path_id: None,
            data: NlriData::Ipv4Unicast("198.51.100.0/24".parse::<Ipv4Network>().unwrap()),
        }],
        attrs: Attributes {
            origin: Some(Origin::Igp),
            nexthop: Some("203.0.113.1".parse().unwrap()),
            ..Default::default()
        },
        reachable: vec![Nlri {
            family: Family::IPV4_UNICAST,
            action: Action::Announce,
            path_id: None,
            data: NlriData::Ipv4Unicast("203.0.113.0/24".parse::<Ipv4Network>().unwrap()),
        }],
    };
    let decoded = roundtrip(update.clone());
    assert_eq!(decoded, update);
    assert_eq!(decoded.withdrawn.len(), 1);
    assert_eq!(decoded.reachable.len(), 1);
}

// An UPDATE whose only content is an MP_UNREACH_NLRI with no NLRI in it is
// the explicit End-of-RIB marker for that family (RFC 4724 §2), distinct
// from the implicit IPv4 unicast form (an UPDATE with nothing in it at
// all).
#[test]
fn end_of_rib_via_empty_mp_unreach() {
    let update = UpdateMsg {
        withdrawn: vec![],
        attrs: Attributes {
            mp_unreach: Some(MpUnreachNlri { family: Family::IPV6_UNICAST, nlri: vec![] }),
            ..Default::default()
        },
        reachable: vec![],
    };
    let decoded = roundtrip(update);
    assert_eq!(decoded.end_of_rib_family(), Some(Family::IPV6_UNICAST));
}

#[test]
fn implicit_ipv4_end_of_rib_is_a_fully_empty_update() {
    let update = UpdateMsg { withdrawn: vec![], attrs: Attributes::default(), reachable: vec![] };
    assert_eq!(update.end_of_rib_family(), Some(Family::IPV4_UNICAST));
}

// IPv6 unicast travels exclusively through MP_REACH_NLRI / MP_UNREACH_NLRI;
// there's no legacy NLRI field for it to fall back to.
#[test]
fn ipv6_unicast_roundtrips_via_mp_attributes() {
    use bgpd::packet::attribute::MpReachNlri;

    let prefix: Ipv6Network = "2001:db8::/32".parse().unwrap();
    let update = UpdateMsg {
        withdrawn: vec![],
        attrs: Attributes {
            origin: Some(Origin::Igp),
            mp_reach: Some(MpReachNlri {
                family: Family::IPV6_UNICAST,
                nexthop: "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap().octets().to_vec(),
                nlri: vec![Nlri {
                    family: Family::IPV6_UNICAST,
                    action: Action::Announce,
                    path_id: None,
                    data: NlriData::Ipv6Unicast(prefix),
                }],
            }),
            ..Default::default()
        },
        reachable: vec![],
    };
    let decoded = roundtrip(update.clone());
    assert_eq!(decoded, update);
}

// RFC 7606: an UPDATE carrying a malformed optional-transitive attribute
// (COMMUNITIES here, length not a multiple of 4) degrades to a withdraw of
// every NLRI it carries rather than tearing down the session.
#[test]
fn malformed_communities_degrades_to_withdraw() {
    use bytes::{BufMut, BytesMut};

    let mut attr_section = BytesMut::new();
    attr_section.put_u8(0x40); // well-known, transitive
    attr_section.put_u8(1); // ORIGIN
    attr_section.put_u8(1);
    attr_section.put_u8(0);
    attr_section.put_u8(0x40);
    attr_section.put_u8(2); // AS_PATH, empty
    attr_section.put_u8(0);
    attr_section.put_u8(0x40);
    attr_section.put_u8(3); // NEXT_HOP
    attr_section.put_u8(4);
    attr_section.put_slice(&[203, 0, 113, 1]);
    attr_section.put_u8(0xc0); // optional, transitive
    attr_section.put_u8(8); // COMMUNITIES
    attr_section.put_u8(3); // not a multiple of 4
    attr_section.put_slice(&[0, 1, 2]);

    let mut body = BytesMut::new();
    body.put_u16(0);
    body.put_u16(attr_section.len() as u16);
    body.extend_from_slice(&attr_section);
    let prefix: Ipv4Network = "192.0.2.0/24".parse().unwrap();
    bgpd::packet::nlri::ip::encode_prefix4(&mut body, &prefix);

    let mut bytes = body.freeze();
    let update = UpdateMsg::decode(&mut bytes, &DecodeCxt::default()).unwrap();
    assert!(update.reachable.is_empty());
    assert_eq!(update.withdrawn.len(), 1);
    assert_eq!(update.withdrawn[0].action, Action::Withdraw);
}
