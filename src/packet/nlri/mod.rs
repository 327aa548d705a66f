//
// Family-keyed NLRI registry (spec.md §4.B). Each (AFI,SAFI) pair gets a
// decode/encode pair; dispatch is a match on `Family` rather than the
// teacher's per-family generic trait (`holo_bgp::af::AddressFamily`),
// because this registry has to cover far more families at runtime than
// holo-bgp's IPv4/IPv6-unicast-only generic parameter lets it express —
// this is the "static registration table" the spec's DESIGN NOTES ask for
// in place of holo's compile-time generics or a decorator-style registry.
//

pub mod bgpls;
pub mod evpn;
pub mod flowspec;
pub mod ip;
pub mod misc;

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use serde::{Deserialize, Serialize};

use crate::packet::consts::{Afi, Safi};

pub use bgpls::BgpLsNlri;
pub use evpn::EvpnRoute;
pub use flowspec::FlowSpecRule;
pub use ip::{LabeledPrefix, VpnPrefix};
pub use misc::{MupRoute, RouteTargetMembership, VplsNlri};

/// An (AFI, SAFI) pair: identity for NLRI/attribute behaviour selection.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Family {
    pub afi: Afi,
    pub safi: Safi,
}

impl Family {
    pub const IPV4_UNICAST: Family = Family { afi: Afi::Ipv4, safi: Safi::Unicast };
    pub const IPV6_UNICAST: Family = Family { afi: Afi::Ipv6, safi: Safi::Unicast };

    pub const fn new(afi: Afi, safi: Safi) -> Family {
        Family { afi, safi }
    }
}

/// Failure decoding one NLRI payload (spec.md §4.B). Truncated/malformed
/// bytes are on par with any other wire read failure; FlowSpec's
/// component-ordering rule (RFC 8955 §4.1, spec.md §4.B edge case) is
/// session-fatal rather than a treat-as-withdraw case, so it gets its own
/// variant `attribute.rs`'s `MpReachNlri`/`MpUnreachNlri::decode` matches
/// on instead of folding every NLRI decode failure into the same bucket.
#[derive(Debug)]
pub enum NlriDecodeError {
    Truncated(TryGetError),
    FlowSpecOutOfOrder,
}

impl From<TryGetError> for NlriDecodeError {
    fn from(e: TryGetError) -> NlriDecodeError {
        NlriDecodeError::Truncated(e)
    }
}

/// Route Distinguisher (RFC 4364), covering Type 0/1/2 encodings.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub enum RouteDistinguisher {
    /// Type 0: 2-byte ASN : 4-byte number.
    Type0 { asn: u16, number: u32 },
    /// Type 1: 4-byte IPv4 address : 2-byte number.
    Type1 { addr: std::net::Ipv4Addr, number: u16 },
    /// Type 2: 4-byte ASN : 2-byte number.
    Type2 { asn: u32, number: u16 },
}

pub const RD_LEN: usize = 8;

impl RouteDistinguisher {
    pub fn decode(buf: &mut Bytes) -> Result<RouteDistinguisher, TryGetError> {
        let rd_type = buf.try_get_u16()?;
        let rd = match rd_type {
            0 => RouteDistinguisher::Type0 {
                asn: buf.try_get_u16()?,
                number: buf.try_get_u32()?,
            },
            1 => RouteDistinguisher::Type1 {
                addr: std::net::Ipv4Addr::from(buf.try_get_u32()?),
                number: buf.try_get_u16()?,
            },
            _ => RouteDistinguisher::Type2 {
                asn: buf.try_get_u32()?,
                number: buf.try_get_u16()?,
            },
        };
        Ok(rd)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            RouteDistinguisher::Type0 { asn, number } => {
                buf.put_u16(0);
                buf.put_u16(*asn);
                buf.put_u32(*number);
            }
            RouteDistinguisher::Type1 { addr, number } => {
                buf.put_u16(1);
                buf.put_u32((*addr).into());
                buf.put_u16(*number);
            }
            RouteDistinguisher::Type2 { asn, number } => {
                buf.put_u16(2);
                buf.put_u32(*asn);
                buf.put_u16(*number);
            }
        }
    }
}

/// MPLS label stack (RFC 8277), 3 bytes per label with a bottom-of-stack
/// bit. Special labels (implicit-null=3, withdraw=0x800000) terminate the
/// stack without the bottom-of-stack bit necessarily being set.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct MplsLabelStack(pub Vec<u32>);

pub const WITHDRAW_LABEL: u32 = 0x80_0000;
pub const IMPLICIT_NULL_LABEL: u32 = 3;

impl MplsLabelStack {
    pub fn decode(buf: &mut Bytes) -> Result<MplsLabelStack, TryGetError> {
        let mut labels = vec![];
        loop {
            if buf.remaining() < 3 {
                return Err(TryGetError { requested: 3, available: buf.remaining() });
            }
            let b0 = buf.get_u8() as u32;
            let b1 = buf.get_u8() as u32;
            let b2 = buf.get_u8() as u32;
            let label = (b0 << 12) | (b1 << 4) | (b2 >> 4);
            let bottom_of_stack = b2 & 1 != 0;
            labels.push(label);
            if bottom_of_stack || label == WITHDRAW_LABEL || label == IMPLICIT_NULL_LABEL {
                break;
            }
        }
        Ok(MplsLabelStack(labels))
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        for (i, label) in self.0.iter().enumerate() {
            let mut raw = *label << 4;
            if i == self.0.len() - 1 {
                raw |= 1;
            }
            let bytes = raw.to_be_bytes();
            buf.put_slice(&bytes[1..4]);
        }
    }

    pub fn byte_len(&self) -> usize {
        self.0.len() * 3
    }
}

/// Whether an NLRI is being announced or withdrawn (spec.md §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum Action {
    Announce,
    Withdraw,
}

/// Per-family NLRI payload, tagged by the same `Family` carried alongside
/// it so attribute and RIB code can dispatch once and reuse the tag.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum NlriData {
    Ipv4Unicast(ipnetwork::Ipv4Network),
    Ipv6Unicast(ipnetwork::Ipv6Network),
    Ipv4Multicast(ipnetwork::Ipv4Network),
    Ipv6Multicast(ipnetwork::Ipv6Network),
    Ipv4LabeledUnicast(LabeledPrefix<ipnetwork::Ipv4Network>),
    Ipv6LabeledUnicast(LabeledPrefix<ipnetwork::Ipv6Network>),
    Ipv4Vpn(VpnPrefix<ipnetwork::Ipv4Network>),
    Ipv6Vpn(VpnPrefix<ipnetwork::Ipv6Network>),
    Evpn(EvpnRoute),
    FlowSpecV4(FlowSpecRule),
    FlowSpecV6(FlowSpecRule),
    FlowSpecVpnV4(RouteDistinguisher, FlowSpecRule),
    FlowSpecVpnV6(RouteDistinguisher, FlowSpecRule),
    BgpLs(BgpLsNlri),
    BgpLsVpn(RouteDistinguisher, BgpLsNlri),
    Mup(MupRoute),
    Rtc(RouteTargetMembership),
    L2vpnVpls(VplsNlri),
}

/// One NLRI entry as carried in an UPDATE (spec.md §3: family, action,
/// optional path-id, family-specific payload).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Nlri {
    pub family: Family,
    pub action: Action,
    pub path_id: Option<u32>,
    pub data: NlriData,
}

/// Identity of an NLRI excluding `action`, per spec.md §3's equality
/// invariant — used as the adj-rib-out/in map key (rib.rs).
#[derive(Clone, Debug)]
pub struct NlriKey {
    pub family: Family,
    pub path_id: Option<u32>,
    pub data: NlriData,
}

impl PartialEq for NlriKey {
    fn eq(&self, other: &Self) -> bool {
        self.family == other.family && self.data == other.data && self.path_id == other.path_id
    }
}
impl Eq for NlriKey {}

impl std::hash::Hash for NlriKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.family.hash(state);
        self.path_id.hash(state);
        format!("{:?}", self.data).hash(state);
    }
}

impl std::cmp::PartialOrd for NlriKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl std::cmp::Ord for NlriKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.family, self.path_id, format!("{:?}", self.data)).cmp(&(
            other.family,
            other.path_id,
            format!("{:?}", other.data),
        ))
    }
}

impl Nlri {
    pub fn key(&self) -> NlriKey {
        NlriKey {
            family: self.family,
            path_id: self.path_id,
            data: self.data.clone(),
        }
    }

    /// Encodes one NLRI, prepending the 32-bit path-id when ADD-PATH is
    /// negotiated for this family in the send direction (spec.md §4.B).
    pub fn encode(&self, buf: &mut BytesMut, addpath: bool) {
        if addpath {
            buf.put_u32(self.path_id.unwrap_or(0));
        }
        self.data.encode(buf);
    }

    /// Consumes exactly the bytes of one NLRI (spec.md §4.B).
    pub fn decode(
        family: Family,
        action: Action,
        addpath: bool,
        buf: &mut Bytes,
    ) -> Result<Nlri, NlriDecodeError> {
        let path_id = if addpath { Some(buf.try_get_u32()?) } else { None };
        let data = NlriData::decode(family, buf)?;
        Ok(Nlri { family, action, path_id, data })
    }
}

impl NlriData {
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            NlriData::Ipv4Unicast(p) => ip::encode_prefix4(buf, p),
            NlriData::Ipv6Unicast(p) => ip::encode_prefix6(buf, p),
            NlriData::Ipv4Multicast(p) => ip::encode_prefix4(buf, p),
            NlriData::Ipv6Multicast(p) => ip::encode_prefix6(buf, p),
            NlriData::Ipv4LabeledUnicast(p) => p.encode(buf, ip::encode_prefix4),
            NlriData::Ipv6LabeledUnicast(p) => p.encode(buf, ip::encode_prefix6),
            NlriData::Ipv4Vpn(p) => p.encode(buf, ip::encode_prefix4),
            NlriData::Ipv6Vpn(p) => p.encode(buf, ip::encode_prefix6),
            NlriData::Evpn(r) => r.encode(buf),
            NlriData::FlowSpecV4(r) | NlriData::FlowSpecV6(r) => r.encode(buf),
            NlriData::FlowSpecVpnV4(rd, r) | NlriData::FlowSpecVpnV6(rd, r) => {
                let mut inner = BytesMut::new();
                rd.encode(&mut inner);
                r.encode(&mut inner);
                buf.put_u16(inner.len() as u16);
                buf.extend_from_slice(&inner);
            }
            NlriData::BgpLs(n) => n.encode(buf),
            NlriData::BgpLsVpn(rd, n) => {
                rd.encode(buf);
                n.encode(buf);
            }
            NlriData::Mup(r) => r.encode(buf),
            NlriData::Rtc(r) => r.encode(buf),
            NlriData::L2vpnVpls(r) => r.encode(buf),
        }
    }

    pub fn decode(family: Family, buf: &mut Bytes) -> Result<NlriData, NlriDecodeError> {
        use Afi::*;
        use Safi::*;

        let data = match (family.afi, family.safi) {
            (Ipv4, Unicast) => NlriData::Ipv4Unicast(ip::decode_prefix4(buf)?),
            (Ipv6, Unicast) => NlriData::Ipv6Unicast(ip::decode_prefix6(buf)?),
            (Ipv4, Multicast) => NlriData::Ipv4Multicast(ip::decode_prefix4(buf)?),
            (Ipv6, Multicast) => NlriData::Ipv6Multicast(ip::decode_prefix6(buf)?),
            (Ipv4, LabeledUnicast) => {
                NlriData::Ipv4LabeledUnicast(LabeledPrefix::decode(buf, ip::decode_prefix4)?)
            }
            (Ipv6, LabeledUnicast) => {
                NlriData::Ipv6LabeledUnicast(LabeledPrefix::decode(buf, ip::decode_prefix6)?)
            }
            (Ipv4, LabeledVpn) => NlriData::Ipv4Vpn(VpnPrefix::decode(buf, ip::decode_prefix4)?),
            (Ipv6, LabeledVpn) => NlriData::Ipv6Vpn(VpnPrefix::decode(buf, ip::decode_prefix6)?),
            (L2vpn, Evpn) => NlriData::Evpn(EvpnRoute::decode(buf)?),
            (Ipv4, FlowSpec) => NlriData::FlowSpecV4(FlowSpecRule::decode(buf)?),
            (Ipv6, FlowSpec) => NlriData::FlowSpecV6(FlowSpecRule::decode(buf)?),
            (Ipv4, FlowSpecVpn) => {
                let len = buf.try_get_u16()? as usize;
                let mut inner = buf.split_to(len.min(buf.remaining()));
                let rd = RouteDistinguisher::decode(&mut inner)?;
                let rule = FlowSpecRule::decode(&mut inner)?;
                NlriData::FlowSpecVpnV4(rd, rule)
            }
            (Ipv6, FlowSpecVpn) => {
                let len = buf.try_get_u16()? as usize;
                let mut inner = buf.split_to(len.min(buf.remaining()));
                let rd = RouteDistinguisher::decode(&mut inner)?;
                let rule = FlowSpecRule::decode(&mut inner)?;
                NlriData::FlowSpecVpnV6(rd, rule)
            }
            (BgpLs, Safi::BgpLs) => NlriData::BgpLs(BgpLsNlri::decode(buf)?),
            (BgpLs, BgpLsVpn) => {
                let rd = RouteDistinguisher::decode(buf)?;
                NlriData::BgpLsVpn(rd, BgpLsNlri::decode(buf)?)
            }
            (Ipv4, Mup) | (Ipv6, Mup) => NlriData::Mup(MupRoute::decode(buf)?),
            (_, RouteTarget) => NlriData::Rtc(RouteTargetMembership::decode(buf)?),
            (L2vpn, Vpls) => NlriData::L2vpnVpls(VplsNlri::decode(buf)?),
            _ => {
                return Err(NlriDecodeError::Truncated(TryGetError { requested: 1, available: 0 }));
            }
        };
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_distinguisher_roundtrip() {
        for rd in [
            RouteDistinguisher::Type0 { asn: 65000, number: 42 },
            RouteDistinguisher::Type1 {
                addr: "192.0.2.1".parse().unwrap(),
                number: 7,
            },
            RouteDistinguisher::Type2 { asn: 4_200_000_000, number: 9 },
        ] {
            let mut buf = BytesMut::new();
            rd.encode(&mut buf);
            assert_eq!(buf.len(), RD_LEN);
            let mut b = buf.freeze();
            assert_eq!(RouteDistinguisher::decode(&mut b).unwrap(), rd);
        }
    }

    #[test]
    fn mpls_label_stack_single_label_roundtrip() {
        let stack = MplsLabelStack(vec![1000]);
        let mut buf = BytesMut::new();
        stack.encode(&mut buf);
        assert_eq!(buf.len(), 3);
        let mut b = buf.freeze();
        assert_eq!(MplsLabelStack::decode(&mut b).unwrap(), stack);
    }
}
