//
// BGP message codec (spec.md §4.D). Every message shares the 19-byte
// header (16-byte marker, 2-byte length including header, 1-byte type);
// grounded in holo-bgp's packet/message.rs `OpenMsg::encode`/`decode`
// (the write-a-zero-then-patch-the-length technique for each length-
// prefixed section) but generalized past its IPv4/IPv6-unicast-only
// `MpReachNlri` handling and extended with RFC 9072 extended optional
// parameters, which holo-bgp does not implement.
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::attribute::{Attributes, MpUnreachNlri};
use crate::packet::capability::Capability;
use crate::packet::consts::{
    Afi, MessageType, OpenParamType, Safi, BGP_VERSION, HEADER_LEN, MARKER, MAX_MSG_LEN,
    MAX_MSG_LEN_EXTENDED,
};
use crate::packet::error::{
    DecodeError, MessageHeaderError, OpenMessageError, RouteRefreshError, UpdateMessageError,
};
use crate::packet::nlri::{Action, Family, Nlri, NlriDecodeError};
use crate::util::bytes_ext::{BytesExt, BytesMutExt};

/// Per-direction context for decoding a message: what the peer has
/// negotiated with us (spec.md §4.E feeds this). Families absent from
/// `addpath_rx` are decoded without a path-id.
#[derive(Clone, Debug, Default)]
pub struct DecodeCxt {
    pub four_byte_asn: bool,
    pub addpath_rx: BTreeSet<Family>,
    /// Whether extended messages (RFC 8654) were negotiated on both sides;
    /// `false` until a session is established, matching spec.md §4.D's
    /// "reject messages > 4096 bytes" default.
    pub extended_message: bool,
}

impl DecodeCxt {
    /// Body-length ceiling this peer is allowed to send us (spec.md §4.D).
    pub fn max_body_len(&self) -> u16 {
        if self.extended_message {
            MAX_MSG_LEN_EXTENDED - HEADER_LEN
        } else {
            MAX_MSG_LEN - HEADER_LEN
        }
    }
}

/// Per-direction context for encoding a message to this peer.
#[derive(Clone, Debug, Default)]
pub struct EncodeCxt {
    pub four_byte_asn: bool,
    pub addpath_tx: BTreeSet<Family>,
    pub extended_message: bool,
    /// Whether to emit OPEN optional parameters in the RFC 9072 extended
    /// form; only done if the peer indicated support or it was configured
    /// (spec.md §4.D), never unconditionally.
    pub extended_opt_params: bool,
}

impl EncodeCxt {
    /// Body-length ceiling this peer has agreed to (spec.md §4.D).
    pub fn max_body_len(&self) -> u16 {
        if self.extended_message {
            MAX_MSG_LEN_EXTENDED - HEADER_LEN
        } else {
            MAX_MSG_LEN - HEADER_LEN
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Open(OpenMsg),
    Update(UpdateMsg),
    Notification(NotificationMsg),
    Keepalive(KeepaliveMsg),
    RouteRefresh(RouteRefreshMsg),
    Operational(OperationalMsg),
    /// Internal "no progress this tick" signal; never appears on the wire.
    Nop,
}

impl Message {
    fn msg_type(&self) -> Option<MessageType> {
        match self {
            Message::Open(_) => Some(MessageType::Open),
            Message::Update(_) => Some(MessageType::Update),
            Message::Notification(_) => Some(MessageType::Notification),
            Message::Keepalive(_) => Some(MessageType::Keepalive),
            Message::RouteRefresh(_) => Some(MessageType::RouteRefresh),
            Message::Operational(_) => Some(MessageType::Operational),
            Message::Nop => None,
        }
    }

    /// Encodes a full message, including header, patching the length
    /// field once the body is known.
    pub fn encode(&self, cxt: &EncodeCxt) -> BytesMut {
        let mut buf = BytesMut::new();
        let Some(msg_type) = self.msg_type() else {
            // Nop never touches the wire; callers that try are a bug.
            return buf;
        };
        buf.put_slice(&MARKER);
        buf.put_u16(0);
        buf.put_u8(msg_type as u8);
        match self {
            Message::Open(msg) => msg.encode(&mut buf, cxt),
            Message::Update(msg) => msg.encode(&mut buf, cxt),
            Message::Notification(msg) => msg.encode(&mut buf),
            Message::Keepalive(_) => {}
            Message::RouteRefresh(msg) => msg.encode(&mut buf),
            Message::Operational(msg) => msg.encode(&mut buf),
            Message::Nop => unreachable!(),
        }
        let len = buf.len() as u16;
        buf[16..18].copy_from_slice(&len.to_be_bytes());
        buf
    }

    /// Peeks the 19-byte header to learn the total message length,
    /// without consuming it. The peer engine calls this after reading
    /// exactly `HEADER_LEN` bytes (spec.md §4.F: framing lives above the
    /// connection layer).
    pub fn peek_len(header: &[u8]) -> Result<u16, MessageHeaderError> {
        if header.len() < HEADER_LEN as usize {
            return Err(MessageHeaderError::BadMessageLength(header.len() as u16));
        }
        if header[..16] != MARKER {
            return Err(MessageHeaderError::ConnectionNotSynchronized);
        }
        let len = u16::from_be_bytes([header[16], header[17]]);
        if len < HEADER_LEN {
            return Err(MessageHeaderError::BadMessageLength(len));
        }
        Ok(len)
    }

    /// Decodes one full framed message (header + body) from `buf`.
    pub fn decode(buf: &mut Bytes, cxt: &DecodeCxt) -> Result<Message, DecodeError> {
        if buf.remaining() < HEADER_LEN as usize {
            return Err(DecodeError::ReadOutOfBounds);
        }
        let marker = buf.copy_to_bytes(16);
        if marker.as_ref() != MARKER {
            return Err(MessageHeaderError::ConnectionNotSynchronized.into());
        }
        let len = buf.get_u16();
        let msg_type_raw = buf.get_u8();
        if len < HEADER_LEN {
            return Err(MessageHeaderError::BadMessageLength(len).into());
        }
        let body_len = (len - HEADER_LEN) as usize;
        if body_len > cxt.max_body_len() as usize {
            return Err(MessageHeaderError::BadMessageLength(len).into());
        }
        if buf.remaining() < body_len {
            return Err(DecodeError::ReadOutOfBounds);
        }
        let mut body = buf.copy_to_bytes(body_len);
        let Some(msg_type) = MessageType::from_u8(msg_type_raw) else {
            return Err(MessageHeaderError::BadMessageType(msg_type_raw).into());
        };
        let message = match msg_type {
            MessageType::Open => Message::Open(OpenMsg::decode(&mut body)?),
            MessageType::Update => Message::Update(UpdateMsg::decode(&mut body, cxt)?),
            MessageType::Notification => Message::Notification(NotificationMsg::decode(&mut body)?),
            MessageType::Keepalive => Message::Keepalive(KeepaliveMsg),
            MessageType::RouteRefresh => Message::RouteRefresh(RouteRefreshMsg::decode(&mut body)?),
            MessageType::Operational => Message::Operational(OperationalMsg::decode(&mut body)),
        };
        Ok(message)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct OpenMsg {
    pub version: u8,
    pub my_as: u16,
    pub holdtime: u16,
    pub identifier: Ipv4Addr,
    pub capabilities: BTreeSet<Capability>,
}

impl OpenMsg {
    pub fn encode(&self, buf: &mut BytesMut, cxt: &EncodeCxt) {
        buf.put_u8(self.version);
        buf.put_u16(self.my_as);
        buf.put_u16(self.holdtime);
        buf.put_ipv4(&self.identifier);

        let opt_params_len_pos = buf.len();
        buf.put_u8(0);
        let opt_params_start = buf.len();

        if !self.capabilities.is_empty() {
            let mut cap_buf = BytesMut::new();
            for cap in &self.capabilities {
                cap.encode(&mut cap_buf);
            }
            if cxt.extended_opt_params {
                buf.put_u8(255);
                buf.put_u16(cap_buf.len() as u16 + 1);
                buf.put_u8(OpenParamType::Capabilities as u8);
            } else {
                buf.put_u8(OpenParamType::Capabilities as u8);
                buf.put_u8(cap_buf.len() as u8);
            }
            buf.extend_from_slice(&cap_buf);
        }

        let opt_params_len = buf.len() - opt_params_start;
        buf[opt_params_len_pos] = opt_params_len as u8;
    }

    pub fn decode(buf: &mut Bytes) -> Result<OpenMsg, OpenMessageError> {
        if buf.remaining() < 10 {
            return Err(OpenMessageError::MalformedOptParam);
        }
        let version = buf.get_u8();
        if version != BGP_VERSION {
            return Err(OpenMessageError::UnsupportedVersion(version));
        }
        let my_as = buf.get_u16();
        if my_as == 0 {
            return Err(OpenMessageError::BadPeerAs);
        }
        let holdtime = buf.get_u16();
        if holdtime == 1 || holdtime == 2 {
            return Err(OpenMessageError::UnacceptableHoldTime);
        }
        let identifier = buf.get_ipv4();
        if identifier.is_unspecified() || identifier.is_multicast() || identifier.is_broadcast() {
            return Err(OpenMessageError::BadBgpIdentifier);
        }

        let opt_params_len = buf.get_u8() as usize;
        if buf.remaining() < opt_params_len {
            return Err(OpenMessageError::MalformedOptParam);
        }
        let mut opt_params = buf.copy_to_bytes(opt_params_len);
        let mut capabilities = BTreeSet::new();
        while opt_params.remaining() > 0 {
            if opt_params.remaining() < 2 {
                return Err(OpenMessageError::MalformedOptParam);
            }
            let param_type = opt_params.get_u8();
            if param_type == 255 {
                // RFC 9072: 2-byte length, then the real param type, then
                // its value; the length includes the real-type byte.
                if opt_params.remaining() < 2 {
                    return Err(OpenMessageError::MalformedOptParam);
                }
                let ext_len = opt_params.get_u16() as usize;
                if ext_len < 1 || opt_params.remaining() < ext_len {
                    return Err(OpenMessageError::MalformedOptParam);
                }
                let mut param_body = opt_params.copy_to_bytes(ext_len);
                let real_type = param_body.get_u8();
                if real_type == OpenParamType::Capabilities as u8 {
                    decode_capabilities(&mut param_body, &mut capabilities)?;
                }
            } else {
                let param_len = opt_params.get_u8() as usize;
                if opt_params.remaining() < param_len {
                    return Err(OpenMessageError::MalformedOptParam);
                }
                let mut param_body = opt_params.copy_to_bytes(param_len);
                if param_type == OpenParamType::Capabilities as u8 {
                    decode_capabilities(&mut param_body, &mut capabilities)?;
                }
            }
        }
        Ok(OpenMsg { version, my_as, holdtime, identifier, capabilities })
    }

    /// The peer's real ASN: the ASN4 capability value if offered,
    /// otherwise the 2-byte header field (spec.md §4.E).
    pub fn real_as(&self) -> u32 {
        for cap in &self.capabilities {
            if let Capability::FourOctetAsNumber { asn } = cap {
                return *asn;
            }
        }
        self.my_as as u32
    }
}

fn decode_capabilities(
    buf: &mut Bytes,
    out: &mut BTreeSet<Capability>,
) -> Result<(), OpenMessageError> {
    while buf.remaining() > 0 {
        match Capability::decode(buf) {
            Ok(cap) => {
                out.insert(cap);
            }
            Err(_) => return Err(OpenMessageError::MalformedOptParam),
        }
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct UpdateMsg {
    /// Legacy IPv4 unicast withdrawn routes, carried directly in the
    /// UPDATE body. Other families withdraw via `attrs.mp_unreach`.
    pub withdrawn: Vec<Nlri>,
    pub attrs: Attributes,
    /// Legacy IPv4 unicast reachable routes. Other families announce via
    /// `attrs.mp_reach`.
    pub reachable: Vec<Nlri>,
}

impl UpdateMsg {
    pub fn encode(&self, buf: &mut BytesMut, cxt: &EncodeCxt) {
        let addpath = cxt.addpath_tx.contains(&Family::IPV4_UNICAST);

        let wd_len_pos = buf.len();
        buf.put_u16(0);
        let wd_start = buf.len();
        for nlri in &self.withdrawn {
            nlri.encode(buf, addpath);
        }
        let wd_len = (buf.len() - wd_start) as u16;
        buf[wd_len_pos..wd_len_pos + 2].copy_from_slice(&wd_len.to_be_bytes());

        let attr_len_pos = buf.len();
        buf.put_u16(0);
        let attr_start = buf.len();
        self.attrs.encode(buf, cxt.four_byte_asn);
        let attr_len = (buf.len() - attr_start) as u16;
        buf[attr_len_pos..attr_len_pos + 2].copy_from_slice(&attr_len.to_be_bytes());

        for nlri in &self.reachable {
            nlri.encode(buf, addpath);
        }
    }

    pub fn decode(buf: &mut Bytes, cxt: &DecodeCxt) -> Result<UpdateMsg, UpdateMessageError> {
        let addpath = cxt.addpath_rx.contains(&Family::IPV4_UNICAST);

        if buf.remaining() < 2 {
            return Err(UpdateMessageError::MalformedAttributeList);
        }
        let wd_len = buf.get_u16() as usize;
        if buf.remaining() < wd_len {
            return Err(UpdateMessageError::MalformedAttributeList);
        }
        let mut wd_buf = buf.copy_to_bytes(wd_len);
        let mut withdrawn = vec![];
        while wd_buf.remaining() > 0 {
            let nlri = Nlri::decode(Family::IPV4_UNICAST, Action::Withdraw, addpath, &mut wd_buf)
                .map_err(|_: NlriDecodeError| UpdateMessageError::InvalidNetworkField)?;
            withdrawn.push(nlri);
        }

        if buf.remaining() < 2 {
            return Err(UpdateMessageError::MalformedAttributeList);
        }
        let attr_len = buf.get_u16() as usize;
        if buf.remaining() < attr_len {
            return Err(UpdateMessageError::MalformedAttributeList);
        }
        let mut attr_buf = buf.copy_to_bytes(attr_len);
        let (attrs, treat_as_withdraw) =
            Attributes::decode(&mut attr_buf, cxt.four_byte_asn, &cxt.addpath_rx)?;

        let mut reachable = vec![];
        while buf.remaining() > 0 {
            let nlri = Nlri::decode(Family::IPV4_UNICAST, Action::Announce, addpath, buf)
                .map_err(|_: NlriDecodeError| UpdateMessageError::InvalidNetworkField)?;
            reachable.push(nlri);
        }

        let update = UpdateMsg { withdrawn, attrs, reachable };
        Ok(if treat_as_withdraw { update.into_withdraw_all() } else { update })
    }

    /// RFC 7606: degrade every reachable NLRI in this UPDATE (legacy v4
    /// and MP_REACH alike) to a withdraw, in place of the attribute(s)
    /// that failed to parse.
    fn into_withdraw_all(mut self) -> UpdateMsg {
        for mut nlri in self.reachable.drain(..).collect::<Vec<_>>() {
            nlri.action = Action::Withdraw;
            self.withdrawn.push(nlri);
        }
        if let Some(mp_reach) = self.attrs.mp_reach.take() {
            let mut unreach = self.attrs.mp_unreach.take().unwrap_or(MpUnreachNlri {
                family: mp_reach.family,
                nlri: vec![],
            });
            for mut nlri in mp_reach.nlri {
                nlri.action = Action::Withdraw;
                unreach.nlri.push(nlri);
            }
            self.attrs.mp_unreach = Some(unreach);
        }
        self
    }

    /// Family signaled as fully withdrawn by this UPDATE being an
    /// End-of-RIB marker (spec.md §4.D / §8 scenario 6), if any.
    pub fn end_of_rib_family(&self) -> Option<Family> {
        if self.withdrawn.is_empty()
            && self.reachable.is_empty()
            && self.attrs == Attributes::default()
        {
            return Some(Family::IPV4_UNICAST);
        }
        if let Some(unreach) = &self.attrs.mp_unreach {
            if unreach.nlri.is_empty() && self.withdrawn.is_empty() && self.reachable.is_empty() {
                return Some(unreach.family);
            }
        }
        None
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NotificationMsg {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

impl NotificationMsg {
    pub fn new(error_code: u8, error_subcode: u8, data: Vec<u8>) -> NotificationMsg {
        NotificationMsg { error_code, error_subcode, data }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.error_code);
        buf.put_u8(self.error_subcode);
        buf.put_slice(&self.data);
    }

    pub fn decode(buf: &mut Bytes) -> Result<NotificationMsg, DecodeError> {
        if buf.remaining() < 2 {
            return Err(DecodeError::ReadOutOfBounds);
        }
        let error_code = buf.get_u8();
        let error_subcode = buf.get_u8();
        let data = buf.copy_to_bytes(buf.remaining()).to_vec();
        Ok(NotificationMsg { error_code, error_subcode, data })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct KeepaliveMsg;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RouteRefreshSubtype {
    Normal = 0,
    // RFC 7313, only meaningful when enhanced route refresh is negotiated.
    BeginOfRib = 1,
    EndOfRib = 2,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteRefreshMsg {
    pub family: Family,
    pub subtype: RouteRefreshSubtype,
}

impl RouteRefreshMsg {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.family.afi as u16);
        buf.put_u8(self.subtype as u8);
        buf.put_u8(self.family.safi as u8);
    }

    pub fn decode(buf: &mut Bytes) -> Result<RouteRefreshMsg, RouteRefreshError> {
        if buf.remaining() != 4 {
            return Err(RouteRefreshError::InvalidMessageLength);
        }
        let afi = Afi::from_u16(buf.get_u16()).unwrap_or(Afi::Ipv4);
        let subtype = match buf.get_u8() {
            1 => RouteRefreshSubtype::BeginOfRib,
            2 => RouteRefreshSubtype::EndOfRib,
            _ => RouteRefreshSubtype::Normal,
        };
        let safi = Safi::from_u8(buf.get_u8()).unwrap_or(Safi::Unicast);
        Ok(RouteRefreshMsg { family: Family::new(afi, safi), subtype })
    }
}

/// ExaBGP's "operational" family (spec.md §4.D): decoded off the wire but
/// forwarded to external processes without local interpretation. Per
/// spec.md §9 open question, a peer sending this without having
/// negotiated the extension is accepted and logged, not rejected.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct OperationalMsg {
    pub raw: Vec<u8>,
}

impl OperationalMsg {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.raw);
    }

    pub fn decode(buf: &mut Bytes) -> OperationalMsg {
        OperationalMsg { raw: buf.copy_to_bytes(buf.remaining()).to_vec() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::capability::{AddPathMode, AddPathTuple};
    use ipnetwork::Ipv4Network;

    fn decode_cxt() -> DecodeCxt {
        DecodeCxt::default()
    }

    fn encode_cxt() -> EncodeCxt {
        EncodeCxt::default()
    }

    #[test]
    fn header_marker_rejection() {
        let mut bytes = vec![0u8; 19];
        bytes[16..18].copy_from_slice(&19u16.to_be_bytes());
        bytes[18] = MessageType::Keepalive as u8;
        let mut buf = Bytes::from(bytes);
        let err = Message::decode(&mut buf, &decode_cxt()).unwrap_err();
        matches!(err, DecodeError::MessageHeader(MessageHeaderError::ConnectionNotSynchronized));
    }

    #[test]
    fn open_roundtrip_with_capabilities() {
        let open = OpenMsg {
            version: BGP_VERSION,
            my_as: 23456,
            holdtime: 180,
            identifier: "192.0.2.1".parse().unwrap(),
            capabilities: BTreeSet::from([
                Capability::FourOctetAsNumber { asn: 4_200_000_000 },
                Capability::RouteRefresh,
                Capability::AddPath(BTreeSet::from([AddPathTuple {
                    afi: Afi::Ipv4,
                    safi: Safi::Unicast,
                    mode: AddPathMode::ReceiveSend,
                }])),
            ]),
        };
        let message = Message::Open(open.clone());
        let mut encoded = message.encode(&encode_cxt());
        let len = Message::peek_len(&encoded).unwrap();
        assert_eq!(len as usize, encoded.len());
        let mut bytes = encoded.split().freeze();
        let decoded = Message::decode(&mut bytes, &decode_cxt()).unwrap();
        assert_eq!(decoded, Message::Open(open));
    }

    #[test]
    fn open_extended_opt_params_roundtrip() {
        let open = OpenMsg {
            version: BGP_VERSION,
            my_as: 65001,
            holdtime: 90,
            identifier: "192.0.2.2".parse().unwrap(),
            capabilities: BTreeSet::from([Capability::ExtendedMessage]),
        };
        let mut cxt = encode_cxt();
        cxt.extended_opt_params = true;
        let mut buf = BytesMut::new();
        open.encode(&mut buf, &cxt);
        let mut bytes = buf.freeze();
        let decoded = OpenMsg::decode(&mut bytes).unwrap();
        assert_eq!(decoded, open);
    }

    #[test]
    fn update_withdraw_and_announce_roundtrip() {
        let update = UpdateMsg {
            withdrawn: vec![Nlri {
                family: Family::IPV4_UNICAST,
                action: Action::Withdraw,
                path_id: None,
                data: crate::packet::nlri::NlriData::Ipv4Unicast(
                    "198.51.100.0/24".parse::<Ipv4Network>().unwrap(),
                ),
            }],
            attrs: Attributes {
                origin: Some(crate::packet::attribute::Origin::Igp),
                nexthop: Some("203.0.113.1".parse().unwrap()),
                ..Default::default()
            },
            reachable: vec![Nlri {
                family: Family::IPV4_UNICAST,
                action: Action::Announce,
                path_id: None,
                data: crate::packet::nlri::NlriData::Ipv4Unicast(
                    "10.0.0.0/24".parse::<Ipv4Network>().unwrap(),
                ),
            }],
        };
        let message = Message::Update(update.clone());
        let mut encoded = message.encode(&encode_cxt());
        let mut bytes = encoded.split().freeze();
        let decoded = Message::decode(&mut bytes, &decode_cxt()).unwrap();
        assert_eq!(decoded, Message::Update(update));
    }

    #[test]
    fn malformed_optional_attribute_converts_to_withdraw() {
        let mut attr_section = BytesMut::new();
        // ORIGIN (well-formed).
        attr_section.put_u8(0x40);
        attr_section.put_u8(1);
        attr_section.put_u8(1);
        attr_section.put_u8(0);
        // AS_PATH (empty, well-formed).
        attr_section.put_u8(0x40);
        attr_section.put_u8(2);
        attr_section.put_u8(0);
        // NEXT_HOP.
        attr_section.put_u8(0x40);
        attr_section.put_u8(3);
        attr_section.put_u8(4);
        attr_section.put_ipv4(&"203.0.113.1".parse().unwrap());
        // COMMUNITIES with a length that isn't a multiple of 4.
        attr_section.put_u8(0xC0);
        attr_section.put_u8(8);
        attr_section.put_u8(3);
        attr_section.put_slice(&[0, 1, 2]);

        let mut body = BytesMut::new();
        body.put_u16(0); // withdrawn routes length
        body.put_u16(attr_section.len() as u16);
        body.extend_from_slice(&attr_section);
        let prefix: Ipv4Network = "10.0.0.0/24".parse().unwrap();
        crate::packet::nlri::ip::encode_prefix4(&mut body, &prefix);

        let mut bytes = body.freeze();
        let update = UpdateMsg::decode(&mut bytes, &decode_cxt()).unwrap();
        assert!(update.reachable.is_empty());
        assert_eq!(update.withdrawn.len(), 1);
        assert_eq!(update.withdrawn[0].action, Action::Withdraw);
    }

    #[test]
    fn end_of_rib_ipv4_unicast() {
        let update = UpdateMsg { withdrawn: vec![], attrs: Attributes::default(), reachable: vec![] };
        assert_eq!(update.end_of_rib_family(), Some(Family::IPV4_UNICAST));
    }

    #[test]
    fn notification_roundtrip() {
        let notif = NotificationMsg::new(6, 7, vec![]);
        let message = Message::Notification(notif.clone());
        let mut encoded = message.encode(&encode_cxt());
        let mut bytes = encoded.split().freeze();
        assert_eq!(Message::decode(&mut bytes, &decode_cxt()).unwrap(), Message::Notification(notif));
    }

    #[test]
    fn route_refresh_enhanced_subtype_roundtrip() {
        let refresh =
            RouteRefreshMsg { family: Family::IPV6_UNICAST, subtype: RouteRefreshSubtype::BeginOfRib };
        let message = Message::RouteRefresh(refresh);
        let mut encoded = message.encode(&encode_cxt());
        let mut bytes = encoded.split().freeze();
        assert_eq!(Message::decode(&mut bytes, &decode_cxt()).unwrap(), Message::RouteRefresh(refresh));
    }
}
