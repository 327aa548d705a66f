//
// BGP-LS (RFC 7752) NLRI: node, link, IPv4/IPv6 topology prefix, and
// SRv6 SID descriptors. Each NLRI type is itself a TLV list of
// descriptors; this module keeps the outer NLRI-type/length framing and
// treats the descriptor TLVs as opaque (type, value) pairs — the
// semantic decode of individual descriptor TLVs (node descriptors, link
// descriptors, ...) is attribute-layer territory (BGP-LS attribute,
// attribute.rs), not NLRI territory, matching how RFC 7752 itself splits
// "where is this in the update" (NLRI) from "what does it say" (attribute).
//

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::packet::consts::BgpLsNlriType;

fn nlri_type_from_wire(v: u16) -> BgpLsNlriType {
    BgpLsNlriType::from_u16(v).unwrap_or(BgpLsNlriType::Node)
}

/// One raw descriptor TLV inside a BGP-LS NLRI body.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct DescriptorTlv {
    pub tlv_type: u16,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct BgpLsNlri {
    pub nlri_type: BgpLsNlriType,
    /// 1 for OSPFv2/OSPFv3, 2 for IS-IS Level 1, etc. (RFC 7752 §3.2.1.
    pub protocol_id: u8,
    pub identifier: u64,
    pub descriptors: Vec<DescriptorTlv>,
}

impl BgpLsNlri {
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        body.put_u8(self.protocol_id);
        body.put_u64(self.identifier);
        for tlv in &self.descriptors {
            body.put_u16(tlv.tlv_type);
            body.put_u16(tlv.value.len() as u16);
            body.put_slice(&tlv.value);
        }
        buf.put_u16(self.nlri_type as u16);
        buf.put_u16(body.len() as u16);
        buf.extend_from_slice(&body);
    }

    pub fn decode(buf: &mut Bytes) -> Result<BgpLsNlri, TryGetError> {
        let nlri_type = nlri_type_from_wire(buf.try_get_u16()?);
        let len = buf.try_get_u16()? as usize;
        if buf.remaining() < len {
            return Err(TryGetError { requested: len, available: buf.remaining() });
        }
        let mut body = buf.split_to(len);
        let protocol_id = body.try_get_u8()?;
        let identifier = body.try_get_u64()?;
        let mut descriptors = vec![];
        while body.has_remaining() {
            let tlv_type = body.try_get_u16()?;
            let tlv_len = body.try_get_u16()? as usize;
            if body.remaining() < tlv_len {
                return Err(TryGetError { requested: tlv_len, available: body.remaining() });
            }
            let value = body.split_to(tlv_len).to_vec();
            descriptors.push(DescriptorTlv { tlv_type, value });
        }
        Ok(BgpLsNlri { nlri_type, protocol_id, identifier, descriptors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_nlri_roundtrip() {
        let nlri = BgpLsNlri {
            nlri_type: BgpLsNlriType::Node,
            protocol_id: 2,
            identifier: 1,
            descriptors: vec![DescriptorTlv { tlv_type: 512, value: vec![0, 0, 0, 1] }],
        };
        let mut buf = BytesMut::new();
        nlri.encode(&mut buf);
        let mut b = buf.freeze();
        assert_eq!(BgpLsNlri::decode(&mut b).unwrap(), nlri);
    }
}
