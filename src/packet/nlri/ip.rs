//
// IPv4/IPv6 unicast, multicast, labeled-unicast (RFC 8277) and
// labeled-VPN (RFC 4364) prefixes. Prefix byte-width logic (shortest byte
// count, zero-padded) lives in `util::bytes_ext`; this module adds the
// label stack and route-distinguisher framing around it.
//

use bytes::{Buf, Bytes, BytesMut, TryGetError};
use ipnetwork::{Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

use crate::packet::nlri::{MplsLabelStack, RouteDistinguisher, RD_LEN};
use crate::util::bytes_ext::{BytesExt, BytesMutExt};

/// A prefix type that can be built from/torn down into raw address bytes,
/// independent of how many bytes precede it on the wire (plain, labeled,
/// or VPN framing all share this).
pub trait PrefixCodec: Sized {
    const ADDR_BITS: u8;

    fn prefix_len(&self) -> u8;
    fn addr_octets(&self) -> Vec<u8>;
    fn from_octets(octets: &[u8], prefix_len: u8) -> Result<Self, TryGetError>;
}

impl PrefixCodec for Ipv4Network {
    const ADDR_BITS: u8 = 32;

    fn prefix_len(&self) -> u8 {
        self.prefix()
    }

    fn addr_octets(&self) -> Vec<u8> {
        self.ip().octets().to_vec()
    }

    fn from_octets(octets: &[u8], prefix_len: u8) -> Result<Self, TryGetError> {
        let mut raw = [0u8; 4];
        raw[..octets.len().min(4)].copy_from_slice(&octets[..octets.len().min(4)]);
        Ipv4Network::new(std::net::Ipv4Addr::from(raw), prefix_len)
            .map_err(|_| TryGetError { requested: 1, available: 0 })
    }
}

impl PrefixCodec for Ipv6Network {
    const ADDR_BITS: u8 = 128;

    fn prefix_len(&self) -> u8 {
        self.prefix()
    }

    fn addr_octets(&self) -> Vec<u8> {
        self.ip().octets().to_vec()
    }

    fn from_octets(octets: &[u8], prefix_len: u8) -> Result<Self, TryGetError> {
        let mut raw = [0u8; 16];
        raw[..octets.len().min(16)].copy_from_slice(&octets[..octets.len().min(16)]);
        Ipv6Network::new(std::net::Ipv6Addr::from(raw), prefix_len)
            .map_err(|_| TryGetError { requested: 1, available: 0 })
    }
}

pub fn encode_prefix4(buf: &mut BytesMut, p: &Ipv4Network) {
    encode_plain(buf, p);
}

pub fn decode_prefix4(buf: &mut Bytes) -> Result<Ipv4Network, TryGetError> {
    decode_plain(buf)
}

pub fn encode_prefix6(buf: &mut BytesMut, p: &Ipv6Network) {
    encode_plain(buf, p);
}

pub fn decode_prefix6(buf: &mut Bytes) -> Result<Ipv6Network, TryGetError> {
    decode_plain(buf)
}

fn encode_plain<P: PrefixCodec>(buf: &mut BytesMut, p: &P) {
    buf.put_u8(p.prefix_len());
    buf.put_prefix_bytes(p.prefix_len(), &p.addr_octets());
}

fn decode_plain<P: PrefixCodec>(buf: &mut Bytes) -> Result<P, TryGetError> {
    let prefix_len = buf.try_get_u8()?;
    let octets = buf.try_get_prefix_bytes(prefix_len, P::ADDR_BITS)?;
    P::from_octets(&octets, prefix_len)
}

/// RFC 8277: a prefix carrying an MPLS label stack ahead of it. The wire
/// prefix-length field covers `8 * label_bytes + real_prefix_len`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct LabeledPrefix<P> {
    pub labels: MplsLabelStack,
    pub prefix: P,
}

impl<P: PrefixCodec> LabeledPrefix<P> {
    pub fn encode(&self, buf: &mut BytesMut, _encode_prefix: impl Fn(&mut BytesMut, &P)) {
        let wire_prefix_len = self.prefix.prefix_len() + (self.labels.byte_len() as u8) * 8;
        buf.put_u8(wire_prefix_len);
        self.labels.encode(buf);
        buf.put_prefix_bytes(self.prefix.prefix_len(), &self.prefix.addr_octets());
    }

    pub fn decode(
        buf: &mut Bytes,
        _decode_prefix: impl Fn(&mut Bytes) -> Result<P, TryGetError>,
    ) -> Result<LabeledPrefix<P>, TryGetError> {
        let wire_prefix_len = buf.try_get_u8()?;
        let labels = MplsLabelStack::decode(buf)?;
        let real_prefix_len = wire_prefix_len.saturating_sub((labels.byte_len() as u8) * 8);
        let octets = buf.try_get_prefix_bytes(real_prefix_len, P::ADDR_BITS)?;
        let prefix = P::from_octets(&octets, real_prefix_len)?;
        Ok(LabeledPrefix { labels, prefix })
    }
}

/// RFC 4364 VPN-IP prefix: route distinguisher followed by a labeled
/// prefix, under the VPN-unicast/VPN-multicast SAFIs.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct VpnPrefix<P> {
    pub rd: RouteDistinguisher,
    pub labels: MplsLabelStack,
    pub prefix: P,
}

impl<P: PrefixCodec> VpnPrefix<P> {
    pub fn encode(&self, buf: &mut BytesMut, _encode_prefix: impl Fn(&mut BytesMut, &P)) {
        let wire_prefix_len = self.prefix.prefix_len()
            + (self.labels.byte_len() as u8) * 8
            + (RD_LEN as u8) * 8;
        buf.put_u8(wire_prefix_len);
        self.labels.encode(buf);
        self.rd.encode(buf);
        buf.put_prefix_bytes(self.prefix.prefix_len(), &self.prefix.addr_octets());
    }

    pub fn decode(
        buf: &mut Bytes,
        _decode_prefix: impl Fn(&mut Bytes) -> Result<P, TryGetError>,
    ) -> Result<VpnPrefix<P>, TryGetError> {
        let wire_prefix_len = buf.try_get_u8()?;
        let labels = MplsLabelStack::decode(buf)?;
        let rd = RouteDistinguisher::decode(buf)?;
        let real_prefix_len =
            wire_prefix_len.saturating_sub((labels.byte_len() as u8) * 8 + (RD_LEN as u8) * 8);
        let octets = buf.try_get_prefix_bytes(real_prefix_len, P::ADDR_BITS)?;
        let prefix = P::from_octets(&octets, real_prefix_len)?;
        Ok(VpnPrefix { rd, labels, prefix })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_prefix_roundtrip_short() {
        let p: Ipv4Network = "10.0.0.0/12".parse().unwrap();
        let mut buf = BytesMut::new();
        encode_prefix4(&mut buf, &p);
        assert_eq!(buf.len(), 1 + 2);
        let mut b = buf.freeze();
        assert_eq!(decode_prefix4(&mut b).unwrap(), p);
    }

    #[test]
    fn ipv6_prefix_roundtrip_zero_len() {
        let p: Ipv6Network = "::/0".parse().unwrap();
        let mut buf = BytesMut::new();
        encode_prefix6(&mut buf, &p);
        assert_eq!(buf.len(), 1);
        let mut b = buf.freeze();
        assert_eq!(decode_prefix6(&mut b).unwrap(), p);
    }

    #[test]
    fn labeled_prefix_roundtrip() {
        let lp = LabeledPrefix {
            labels: MplsLabelStack(vec![42]),
            prefix: "198.51.100.0/24".parse::<Ipv4Network>().unwrap(),
        };
        let mut buf = BytesMut::new();
        lp.encode(&mut buf, encode_prefix4);
        let mut b = buf.freeze();
        let decoded = LabeledPrefix::decode(&mut b, decode_prefix4).unwrap();
        assert_eq!(decoded, lp);
    }
}
