//
// Smaller NLRI families that don't warrant their own submodule: MUP
// (draft-mpmz-bess-mup-safi), RTC (RFC 4684 route-target constrain), and
// L2VPN-VPLS (RFC 4761/4762).
//

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::packet::consts::MupRouteType;
use crate::packet::nlri::RouteDistinguisher;
use crate::util::bytes_ext::BytesExt;

fn mup_route_type_from_wire(v: u8) -> MupRouteType {
    MupRouteType::from_u8(v).unwrap_or(MupRouteType::InterworkSegmentDiscovery)
}

/// Mobile User Plane route. Per-type bodies vary widely in the real
/// spec; this carries the RD common to every MUP route type plus an
/// opaque payload, the way BGP-LS descriptors are treated here too —
/// full per-type decode is left to the attribute/RIB layer that
/// understands the specific architecture (5G, EPC, ...) in use.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MupRoute {
    pub route_type: MupRouteType,
    pub rd: RouteDistinguisher,
    pub payload: Vec<u8>,
}

impl MupRoute {
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        self.rd.encode(&mut body);
        body.put_slice(&self.payload);
        buf.put_u8(self.route_type as u8);
        buf.put_u8(body.len() as u8);
        buf.extend_from_slice(&body);
    }

    pub fn decode(buf: &mut Bytes) -> Result<MupRoute, TryGetError> {
        let route_type = mup_route_type_from_wire(buf.try_get_u8()?);
        let len = buf.try_get_u8()? as usize;
        if buf.remaining() < len {
            return Err(TryGetError { requested: len, available: buf.remaining() });
        }
        let mut body = buf.split_to(len);
        let rd = RouteDistinguisher::decode(&mut body)?;
        let payload = body.to_vec();
        Ok(MupRoute { route_type, rd, payload })
    }
}

/// RFC 4684 Route Target membership NLRI: origin AS + 8-byte route
/// target, with a prefix-length in bits like any other prefix family (a
/// length of 0 is the special "match all" wildcard).
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct RouteTargetMembership {
    pub origin_as: u32,
    pub route_target: [u8; 8],
    pub prefix_bits: u8,
}

impl RouteTargetMembership {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.prefix_bits);
        if self.prefix_bits == 0 {
            return;
        }
        buf.put_u32(self.origin_as);
        let rt_bits = self.prefix_bits.saturating_sub(32);
        let rt_bytes = rt_bits.div_ceil(8) as usize;
        buf.put_slice(&self.route_target[..rt_bytes]);
    }

    pub fn decode(buf: &mut Bytes) -> Result<RouteTargetMembership, TryGetError> {
        let prefix_bits = buf.try_get_u8()?;
        if prefix_bits == 0 {
            return Ok(RouteTargetMembership {
                origin_as: 0,
                route_target: [0; 8],
                prefix_bits: 0,
            });
        }
        let origin_as = buf.try_get_u32()?;
        let rt_bits = prefix_bits.saturating_sub(32);
        let read = buf.try_get_prefix_bytes(rt_bits, 64)?;
        let mut route_target = [0u8; 8];
        route_target.copy_from_slice(&read);
        Ok(RouteTargetMembership { origin_as, route_target, prefix_bits })
    }
}

/// RFC 4761 VPLS NLRI: a single fixed-width entry per VSI, no label
/// stack sharing with the IP families.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct VplsNlri {
    pub rd: RouteDistinguisher,
    pub ve_id: u16,
    pub ve_block_offset: u16,
    pub ve_block_size: u16,
    pub label_base: u32,
}

impl VplsNlri {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(17);
        self.rd.encode(buf);
        buf.put_u16(self.ve_id);
        buf.put_u16(self.ve_block_offset);
        buf.put_u16(self.ve_block_size);
        let label = self.label_base << 4 | 1;
        let bytes = label.to_be_bytes();
        buf.put_slice(&bytes[1..4]);
    }

    pub fn decode(buf: &mut Bytes) -> Result<VplsNlri, TryGetError> {
        let _len = buf.try_get_u16()?;
        let rd = RouteDistinguisher::decode(buf)?;
        let ve_id = buf.try_get_u16()?;
        let ve_block_offset = buf.try_get_u16()?;
        let ve_block_size = buf.try_get_u16()?;
        let label_raw = buf.try_get_u24()?;
        let label_base = label_raw >> 4;
        Ok(VplsNlri { rd, ve_id, ve_block_offset, ve_block_size, label_base })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtc_wildcard_roundtrip() {
        let rtc = RouteTargetMembership { origin_as: 0, route_target: [0; 8], prefix_bits: 0 };
        let mut buf = BytesMut::new();
        rtc.encode(&mut buf);
        assert_eq!(buf.len(), 1);
        let mut b = buf.freeze();
        assert_eq!(RouteTargetMembership::decode(&mut b).unwrap(), rtc);
    }

    #[test]
    fn vpls_nlri_roundtrip() {
        let nlri = VplsNlri {
            rd: RouteDistinguisher::Type0 { asn: 100, number: 1 },
            ve_id: 5,
            ve_block_offset: 0,
            ve_block_size: 10,
            label_base: 16,
        };
        let mut buf = BytesMut::new();
        nlri.encode(&mut buf);
        let mut b = buf.freeze();
        assert_eq!(VplsNlri::decode(&mut b).unwrap(), nlri);
    }
}
