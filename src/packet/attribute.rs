//
// Path-attribute framework (spec.md §4.C). `Attributes` is the ordered,
// attribute-code-keyed collection the spec calls for; each field owns its
// own flag/length profile and (de)serializer. Grounded in holo-bgp's
// `Attrs`/`BaseAttrs` split (packet/attribute.rs) and generalized past its
// IPv4/IPv6-unicast-only `MpReachNlri`/`MpUnreachNlri` to the full family
// registry in `packet::nlri`.
//

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use lru::LruCache;
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::packet::consts::{AsPathSegmentType, AttrFlags, AttrType};
use crate::packet::error::{AttrError, UpdateMessageError};
use crate::packet::nlri::{Family, Nlri, NlriDecodeError};
use crate::util::bytes_ext::{BytesExt, BytesMutExt};

/// BGP ORIGIN attribute values (RFC 4271 §5.1.1).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Origin {
    #[default]
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPath {
    pub segments: Vec<AsPathSegment>,
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPathSegment {
    pub seg_type: AsPathSegmentType,
    pub members: Vec<u32>,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Aggregator {
    pub asn: u32,
    pub identifier: Ipv4Addr,
}

/// An opaque attribute this build doesn't know how to decode. Kept with
/// its original flags (partial bit forced on if optional-transitive, per
/// spec.md §4.C step 3) so it survives a re-encode/forward unmodified.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct UnknownAttr {
    pub attr_type: u8,
    pub flags: AttrFlags,
    pub value: Bytes,
}

/// MP_REACH_NLRI (RFC 4760): reachable NLRI for a non-IPv4-unicast family,
/// carried inside the attribute section rather than the UPDATE body.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MpReachNlri {
    pub family: Family,
    /// Raw next-hop octets; width is family-dependent (4, 16, or 32 for
    /// global+link-local IPv6 per RFC 8950).
    pub nexthop: Vec<u8>,
    pub nlri: Vec<Nlri>,
}

/// MP_UNREACH_NLRI (RFC 4760): withdrawn NLRI for a non-IPv4-unicast
/// family.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MpUnreachNlri {
    pub family: Family,
    pub nlri: Vec<Nlri>,
}

/// The attribute section of an UPDATE (spec.md §3/§4.C). Ordered by
/// attribute code on the wire; the Rust struct fields instead so callers
/// access each attribute directly instead of indexing a map.
#[derive(Clone, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Attributes {
    pub origin: Option<Origin>,
    pub as_path: AsPath,
    pub as4_path: Option<AsPath>,
    pub nexthop: Option<IpAddr>,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    pub atomic_aggregate: bool,
    pub aggregator: Option<Aggregator>,
    pub as4_aggregator: Option<Aggregator>,
    pub communities: Option<BTreeSet<u32>>,
    pub originator_id: Option<Ipv4Addr>,
    pub cluster_list: Option<Vec<Ipv4Addr>>,
    pub ext_communities: Option<BTreeSet<[u8; 8]>>,
    pub extv6_communities: Option<BTreeSet<[u8; 20]>>,
    pub large_communities: Option<BTreeSet<(u32, u32, u32)>>,
    pub aigp: Option<u64>,
    /// RFC 9234 "Only to Customer" attribute.
    pub otc: Option<u32>,
    pub mp_reach: Option<MpReachNlri>,
    pub mp_unreach: Option<MpUnreachNlri>,
    pub unknown: Vec<UnknownAttr>,
}

impl Default for Attributes {
    fn default() -> Attributes {
        Attributes {
            origin: None,
            as_path: AsPath::default(),
            as4_path: None,
            nexthop: None,
            med: None,
            local_pref: None,
            atomic_aggregate: false,
            aggregator: None,
            as4_aggregator: None,
            communities: None,
            originator_id: None,
            cluster_list: None,
            ext_communities: None,
            extv6_communities: None,
            large_communities: None,
            aigp: None,
            otc: None,
            mp_reach: None,
            mp_unreach: None,
            unknown: vec![],
        }
    }
}

impl Hash for Attributes {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // `Attributes` is used as a grouping key when draining adj-rib-out
        // (spec.md §4.H: "share the same Attributes"); hashing the packed
        // wire form is both cheap (reuses the pack cache) and exactly the
        // equality this grouping cares about.
        format!("{self:?}").hash(state);
    }
}

/// Expected (optional, transitive) flag bits for each known attribute
/// type, used to validate the flags actually seen on the wire
/// (spec.md §4.C step 2).
fn expected_flags(attr_type: AttrType) -> AttrFlags {
    use AttrType::*;
    match attr_type {
        Origin | AsPath | Nexthop => AttrFlags::TRANSITIVE,
        Med => AttrFlags::OPTIONAL,
        LocalPref => AttrFlags::empty(),
        AtomicAggregate => AttrFlags::TRANSITIVE,
        Aggregator | Communities | ExtCommunities | Extv6Community | LargeCommunity => {
            AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE
        }
        OriginatorId | ClusterList | MpReachNlri | MpUnreachNlri => AttrFlags::OPTIONAL,
        As4Path | As4Aggregator | Otc => AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
        Aigp => AttrFlags::OPTIONAL,
    }
}

/// Process-wide, size-bounded cache of packed `Attributes` byte strings
/// (spec.md §4.C: "Cache the resulting byte string keyed by structural
/// hash; LRU with bounded entries"). The reactor is single-threaded
/// (spec.md §5), so this is `Rc<RefCell<..>>` rather than behind a mutex.
#[derive(Clone)]
pub struct PackCache {
    inner: Rc<RefCell<LruCache<u64, Bytes>>>,
}

impl PackCache {
    pub fn new(capacity: usize) -> PackCache {
        let capacity = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
        PackCache { inner: Rc::new(RefCell::new(LruCache::new(capacity))) }
    }

    fn key(attrs: &Attributes) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        attrs.hash(&mut hasher);
        hasher.finish()
    }

    /// Returns the packed form of `attrs`, encoding (and caching) it on a
    /// miss.
    pub fn pack(&self, attrs: &Attributes, four_byte_asn: bool) -> Bytes {
        let key = Self::key(attrs);
        if let Some(hit) = self.inner.borrow_mut().get(&key) {
            return hit.clone();
        }
        let mut buf = BytesMut::new();
        attrs.encode(&mut buf, four_byte_asn);
        let packed = buf.freeze();
        self.inner.borrow_mut().put(key, packed.clone());
        packed
    }
}

impl Default for PackCache {
    fn default() -> PackCache {
        // Matches holo-bgp's bounded attribute-set caches in spirit;
        // 4096 packed attribute blocks is enough for any single peer's
        // batch of distinct NLRI-attribute groupings.
        PackCache::new(4096)
    }
}

fn put_attr_header(buf: &mut BytesMut, flags: AttrFlags, attr_type: u8, len: usize) {
    let mut flags = flags;
    if len > 255 {
        flags |= AttrFlags::EXTENDED;
    }
    buf.put_u8(flags.bits());
    buf.put_u8(attr_type);
    if flags.contains(AttrFlags::EXTENDED) {
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(len as u8);
    }
}

fn encode_tlv(
    buf: &mut BytesMut,
    flags: AttrFlags,
    attr_type: AttrType,
    body: impl FnOnce(&mut BytesMut),
) {
    let mut tmp = BytesMut::new();
    body(&mut tmp);
    put_attr_header(buf, flags, attr_type as u8, tmp.len());
    buf.extend_from_slice(&tmp);
}

impl Attributes {
    /// Packs the attribute section in the canonical order spec.md §4.C
    /// mandates: MP_REACH/MP_UNREACH first (RFC 7606 §5.1), then
    /// well-known mandatory (ORIGIN, AS_PATH, NEXT_HOP), then ascending
    /// type code.
    pub(crate) fn encode(&self, buf: &mut BytesMut, four_byte_asn: bool) {
        if let Some(mp_reach) = &self.mp_reach {
            encode_tlv(buf, AttrFlags::OPTIONAL, AttrType::MpReachNlri, |b| {
                mp_reach.encode(b)
            });
        }
        if let Some(mp_unreach) = &self.mp_unreach {
            encode_tlv(buf, AttrFlags::OPTIONAL, AttrType::MpUnreachNlri, |b| {
                mp_unreach.encode(b)
            });
        }
        if let Some(origin) = self.origin {
            encode_tlv(buf, AttrFlags::TRANSITIVE, AttrType::Origin, |b| {
                b.put_u8(origin as u8);
            });
        }
        encode_tlv(buf, AttrFlags::TRANSITIVE, AttrType::AsPath, |b| {
            self.as_path.encode(b, four_byte_asn);
        });
        if let Some(nexthop) = self.nexthop {
            encode_tlv(buf, AttrFlags::TRANSITIVE, AttrType::Nexthop, |b| {
                if let IpAddr::V4(addr) = nexthop {
                    b.put_ipv4(&addr);
                }
            });
        }
        if let Some(med) = self.med {
            encode_tlv(buf, AttrFlags::OPTIONAL, AttrType::Med, |b| b.put_u32(med));
        }
        if let Some(local_pref) = self.local_pref {
            encode_tlv(buf, AttrFlags::empty(), AttrType::LocalPref, |b| {
                b.put_u32(local_pref)
            });
        }
        if self.atomic_aggregate {
            encode_tlv(buf, AttrFlags::TRANSITIVE, AttrType::AtomicAggregate, |_| {});
        }
        if let Some(agg) = &self.aggregator {
            encode_tlv(
                buf,
                AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
                AttrType::Aggregator,
                |b| agg.encode(b, four_byte_asn),
            );
        }
        if let Some(comm) = &self.communities {
            encode_tlv(
                buf,
                AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
                AttrType::Communities,
                |b| comm.iter().for_each(|c| b.put_u32(*c)),
            );
        }
        if let Some(id) = self.originator_id {
            encode_tlv(buf, AttrFlags::OPTIONAL, AttrType::OriginatorId, |b| {
                b.put_ipv4(&id)
            });
        }
        if let Some(list) = &self.cluster_list {
            encode_tlv(buf, AttrFlags::OPTIONAL, AttrType::ClusterList, |b| {
                list.iter().for_each(|id| b.put_ipv4(id))
            });
        }
        if let Some(ext) = &self.ext_communities {
            encode_tlv(
                buf,
                AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
                AttrType::ExtCommunities,
                |b| ext.iter().for_each(|c| b.put_slice(c)),
            );
        }
        if let Some(as4) = &self.as4_path {
            encode_tlv(
                buf,
                AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
                AttrType::As4Path,
                |b| as4.encode(b, true),
            );
        }
        if let Some(agg) = &self.as4_aggregator {
            encode_tlv(
                buf,
                AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
                AttrType::As4Aggregator,
                |b| agg.encode(b, true),
            );
        }
        if let Some(ext) = &self.extv6_communities {
            encode_tlv(
                buf,
                AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
                AttrType::Extv6Community,
                |b| ext.iter().for_each(|c| b.put_slice(c)),
            );
        }
        if let Some(aigp) = self.aigp {
            encode_tlv(buf, AttrFlags::OPTIONAL, AttrType::Aigp, |b| {
                // RFC 7311: one TLV, type 1, 11-byte total length.
                b.put_u8(1);
                b.put_u16(11);
                b.put_u64(aigp);
            });
        }
        if let Some(large) = &self.large_communities {
            encode_tlv(
                buf,
                AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
                AttrType::LargeCommunity,
                |b| {
                    large.iter().for_each(|(g, l1, l2)| {
                        b.put_u32(*g);
                        b.put_u32(*l1);
                        b.put_u32(*l2);
                    })
                },
            );
        }
        if let Some(otc) = self.otc {
            encode_tlv(
                buf,
                AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
                AttrType::Otc,
                |b| b.put_u32(otc),
            );
        }
        for attr in &self.unknown {
            put_attr_header(buf, attr.flags, attr.attr_type, attr.value.len());
            buf.extend_from_slice(&attr.value);
        }
    }

    /// Decodes the attribute section of an UPDATE. Always runs to the end
    /// of `buf` even after a soft (treat-as-withdraw) failure, because the
    /// reachable NLRI that follows still needs `mp_reach`/`nexthop` parsed
    /// to know what to withdraw (spec.md §4.C algorithm, step 5; §9 design
    /// note on treat-as-withdraw).
    pub fn decode(
        buf: &mut Bytes,
        four_byte_asn: bool,
        addpath_rx: &BTreeSet<Family>,
    ) -> Result<(Attributes, bool), UpdateMessageError> {
        let mut attrs = Attributes::default();
        let mut seen = BTreeSet::new();
        let mut treat_as_withdraw = false;

        while buf.remaining() > 0 {
            if buf.remaining() < 3 {
                return Err(UpdateMessageError::MalformedAttributeList);
            }
            let flags = AttrFlags::from_bits_truncate(buf.get_u8());
            let attr_type_raw = buf.get_u8();
            let extended = flags.contains(AttrFlags::EXTENDED);
            let len = if extended {
                if buf.remaining() < 2 {
                    return Err(UpdateMessageError::MalformedAttributeList);
                }
                buf.get_u16() as usize
            } else {
                buf.get_u8() as usize
            };
            if len > buf.remaining() {
                return Err(UpdateMessageError::MalformedAttributeList);
            }
            let mut body = buf.copy_to_bytes(len);

            // spec.md §4.C step 4: any duplicate type code is session-fatal.
            if !seen.insert(attr_type_raw) {
                return Err(UpdateMessageError::MalformedAttributeList);
            }

            let Some(attr_type) = AttrType::from_u8(attr_type_raw) else {
                // Unknown type (step 3): keep opaque if optional-transitive,
                // otherwise silently drop.
                if flags.contains(AttrFlags::OPTIONAL) && flags.contains(AttrFlags::TRANSITIVE) {
                    attrs.unknown.push(UnknownAttr {
                        attr_type: attr_type_raw,
                        flags: flags | AttrFlags::PARTIAL,
                        value: body,
                    });
                }
                continue;
            };

            // spec.md §4.C step 2: flag-bit mismatch is a soft failure.
            let mask = AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE;
            if (flags & mask) != expected_flags(attr_type)
                || (flags.contains(AttrFlags::PARTIAL) && !flags.contains(AttrFlags::TRANSITIVE))
            {
                treat_as_withdraw = true;
                continue;
            }

            let result = match attr_type {
                AttrType::Origin => decode_origin(&mut body, &mut attrs.origin),
                AttrType::AsPath => {
                    AsPath::decode(&mut body, four_byte_asn).map(|v| attrs.as_path = v)
                }
                AttrType::As4Path => AsPath::decode(&mut body, true)
                    .map(|v| attrs.as4_path = Some(v)),
                AttrType::Nexthop => decode_nexthop(&mut body, &mut attrs.nexthop),
                AttrType::Med => decode_u32(&mut body).map(|v| attrs.med = Some(v)),
                AttrType::LocalPref => {
                    decode_u32(&mut body).map(|v| attrs.local_pref = Some(v))
                }
                AttrType::AtomicAggregate => {
                    attrs.atomic_aggregate = true;
                    Ok(())
                }
                AttrType::Aggregator => Aggregator::decode(&mut body, four_byte_asn)
                    .map(|v| attrs.aggregator = Some(v)),
                AttrType::As4Aggregator => Aggregator::decode(&mut body, true)
                    .map(|v| attrs.as4_aggregator = Some(v)),
                AttrType::Communities => decode_communities(&mut body)
                    .map(|v| attrs.communities = Some(v)),
                AttrType::OriginatorId => decode_ipv4(&mut body)
                    .map(|v| attrs.originator_id = Some(v)),
                AttrType::ClusterList => decode_cluster_list(&mut body)
                    .map(|v| attrs.cluster_list = Some(v)),
                AttrType::MpReachNlri => {
                    MpReachNlri::decode(&mut body, addpath_rx).map(|v| attrs.mp_reach = Some(v))
                }
                AttrType::MpUnreachNlri => {
                    MpUnreachNlri::decode(&mut body, addpath_rx).map(|v| attrs.mp_unreach = Some(v))
                }
                AttrType::ExtCommunities => decode_ext_communities(&mut body)
                    .map(|v| attrs.ext_communities = Some(v)),
                AttrType::Extv6Community => decode_extv6_communities(&mut body)
                    .map(|v| attrs.extv6_communities = Some(v)),
                AttrType::LargeCommunity => decode_large_communities(&mut body)
                    .map(|v| attrs.large_communities = Some(v)),
                AttrType::Aigp => decode_aigp(&mut body).map(|v| attrs.aigp = Some(v)),
                AttrType::Otc => decode_u32(&mut body).map(|v| attrs.otc = Some(v)),
            };
            match result {
                Ok(()) => {}
                Err(AttrError::TreatAsWithdraw) => treat_as_withdraw = true,
                Err(AttrError::SessionReset(e)) => return Err(e),
            }
        }

        if attrs.mp_reach.is_none() && attrs.origin.is_some() {
            // A plain-IPv4-unicast UPDATE with reachable NLRI must carry the
            // well-known mandatory attributes (spec.md §3); the caller
            // checks this against `nlri_present` once it knows whether the
            // UPDATE body actually carried NLRI.
        }

        Ok((attrs, treat_as_withdraw))
    }

    /// True when ORIGIN, AS_PATH and NEXT_HOP (for plain IPv4 unicast
    /// reachability) are all present, as required by spec.md §3 whenever
    /// an UPDATE carries reachable NLRI.
    pub fn has_mandatory(&self, mp_reach_present: bool) -> bool {
        self.origin.is_some() && (mp_reach_present || self.nexthop.is_some())
    }
}

impl AsPath {
    fn encode(&self, buf: &mut BytesMut, four_byte_asn: bool) {
        for seg in &self.segments {
            buf.put_u8(seg.seg_type as u8);
            buf.put_u8(seg.members.len() as u8);
            for asn in &seg.members {
                if four_byte_asn {
                    buf.put_u32(*asn);
                } else {
                    buf.put_u16(*asn as u16);
                }
            }
        }
    }

    fn decode(buf: &mut Bytes, four_byte_asn: bool) -> Result<AsPath, AttrError> {
        let mut segments = vec![];
        while buf.remaining() > 0 {
            if buf.remaining() < 2 {
                return Err(AttrError::TreatAsWithdraw);
            }
            let seg_type_raw = buf.get_u8();
            let Some(seg_type) = AsPathSegmentType::from_u8(seg_type_raw) else {
                return Err(AttrError::TreatAsWithdraw);
            };
            let count = buf.get_u8() as usize;
            let width = if four_byte_asn { 4 } else { 2 };
            if buf.remaining() < count * width {
                return Err(AttrError::TreatAsWithdraw);
            }
            let mut members = Vec::with_capacity(count);
            for _ in 0..count {
                members.push(if four_byte_asn {
                    buf.get_u32()
                } else {
                    buf.get_u16() as u32
                });
            }
            segments.push(AsPathSegment { seg_type, members });
        }
        Ok(AsPath { segments })
    }
}

impl Aggregator {
    fn encode(&self, buf: &mut BytesMut, four_byte_asn: bool) {
        if four_byte_asn {
            buf.put_u32(self.asn);
        } else {
            buf.put_u16(self.asn as u16);
        }
        buf.put_ipv4(&self.identifier);
    }

    fn decode(buf: &mut Bytes, four_byte_asn: bool) -> Result<Aggregator, AttrError> {
        let needed = if four_byte_asn { 8 } else { 6 };
        if buf.remaining() != needed {
            return Err(AttrError::TreatAsWithdraw);
        }
        let asn = if four_byte_asn { buf.get_u32() } else { buf.get_u16() as u32 };
        let identifier = buf.get_ipv4();
        Ok(Aggregator { asn, identifier })
    }
}

impl MpReachNlri {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.family.afi as u16);
        buf.put_u8(self.family.safi as u8);
        buf.put_u8(self.nexthop.len() as u8);
        buf.put_slice(&self.nexthop);
        buf.put_u8(0); // Reserved (SNPA count, always 0).
        for nlri in &self.nlri {
            nlri.encode(buf, nlri.path_id.is_some());
        }
    }

    fn decode(buf: &mut Bytes, addpath_rx: &BTreeSet<Family>) -> Result<MpReachNlri, AttrError> {
        use crate::packet::consts::{Afi, Safi};

        if buf.remaining() < 4 {
            return Err(AttrError::TreatAsWithdraw);
        }
        let afi = num_traits::FromPrimitive::from_u16(buf.get_u16())
            .unwrap_or(Afi::Ipv4);
        let safi = num_traits::FromPrimitive::from_u8(buf.get_u8())
            .unwrap_or(Safi::Unicast);
        let family = Family::new(afi, safi);
        let addpath = addpath_rx.contains(&family);
        if buf.remaining() < 1 {
            return Err(AttrError::TreatAsWithdraw);
        }
        let nh_len = buf.get_u8() as usize;
        if buf.remaining() < nh_len + 1 {
            return Err(AttrError::TreatAsWithdraw);
        }
        let nexthop = buf.copy_to_bytes(nh_len).to_vec();
        let _snpa = buf.get_u8();
        let mut nlri = vec![];
        while buf.remaining() > 0 {
            match Nlri::decode(family, crate::packet::nlri::Action::Announce, addpath, buf) {
                Ok(n) => nlri.push(n),
                // FlowSpec component ordering is session-fatal (spec.md
                // §4.B), not a treat-as-withdraw case.
                Err(NlriDecodeError::FlowSpecOutOfOrder) => {
                    return Err(AttrError::SessionReset(UpdateMessageError::InvalidNetworkField))
                }
                Err(NlriDecodeError::Truncated(_)) => return Err(AttrError::TreatAsWithdraw),
            }
        }
        Ok(MpReachNlri { family, nexthop, nlri })
    }
}

impl MpUnreachNlri {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.family.afi as u16);
        buf.put_u8(self.family.safi as u8);
        for nlri in &self.nlri {
            nlri.encode(buf, nlri.path_id.is_some());
        }
    }

    fn decode(buf: &mut Bytes, addpath_rx: &BTreeSet<Family>) -> Result<MpUnreachNlri, AttrError> {
        use crate::packet::consts::{Afi, Safi};

        if buf.remaining() < 3 {
            return Err(AttrError::TreatAsWithdraw);
        }
        let afi = num_traits::FromPrimitive::from_u16(buf.get_u16())
            .unwrap_or(Afi::Ipv4);
        let safi = num_traits::FromPrimitive::from_u8(buf.get_u8())
            .unwrap_or(Safi::Unicast);
        let family = Family::new(afi, safi);
        let addpath = addpath_rx.contains(&family);
        let mut nlri = vec![];
        while buf.remaining() > 0 {
            match Nlri::decode(family, crate::packet::nlri::Action::Withdraw, addpath, buf) {
                Ok(n) => nlri.push(n),
                Err(NlriDecodeError::FlowSpecOutOfOrder) => {
                    return Err(AttrError::SessionReset(UpdateMessageError::InvalidNetworkField))
                }
                Err(NlriDecodeError::Truncated(_)) => return Err(AttrError::TreatAsWithdraw),
            }
        }
        Ok(MpUnreachNlri { family, nlri })
    }
}

fn decode_origin(buf: &mut Bytes, out: &mut Option<Origin>) -> Result<(), AttrError> {
    if buf.remaining() != 1 {
        return Err(AttrError::TreatAsWithdraw);
    }
    match Origin::from_u8(buf.get_u8()) {
        Some(origin) => {
            *out = Some(origin);
            Ok(())
        }
        None => Err(AttrError::TreatAsWithdraw),
    }
}

fn decode_nexthop(buf: &mut Bytes, out: &mut Option<IpAddr>) -> Result<(), AttrError> {
    if buf.remaining() != 4 {
        return Err(AttrError::TreatAsWithdraw);
    }
    *out = Some(IpAddr::V4(buf.try_get_ipv4().map_err(|_: TryGetError| AttrError::TreatAsWithdraw)?));
    Ok(())
}

fn decode_u32(buf: &mut Bytes) -> Result<u32, AttrError> {
    if buf.remaining() != 4 {
        return Err(AttrError::TreatAsWithdraw);
    }
    Ok(buf.get_u32())
}

fn decode_ipv4(buf: &mut Bytes) -> Result<Ipv4Addr, AttrError> {
    if buf.remaining() != 4 {
        return Err(AttrError::TreatAsWithdraw);
    }
    Ok(buf.get_ipv4())
}

fn decode_cluster_list(buf: &mut Bytes) -> Result<Vec<Ipv4Addr>, AttrError> {
    if buf.remaining() % 4 != 0 {
        return Err(AttrError::TreatAsWithdraw);
    }
    let mut list = vec![];
    while buf.remaining() > 0 {
        list.push(buf.get_ipv4());
    }
    Ok(list)
}

fn decode_communities(buf: &mut Bytes) -> Result<BTreeSet<u32>, AttrError> {
    if buf.remaining() % 4 != 0 {
        return Err(AttrError::TreatAsWithdraw);
    }
    let mut set = BTreeSet::new();
    while buf.remaining() > 0 {
        set.insert(buf.get_u32());
    }
    Ok(set)
}

fn decode_ext_communities(buf: &mut Bytes) -> Result<BTreeSet<[u8; 8]>, AttrError> {
    if buf.remaining() % 8 != 0 {
        return Err(AttrError::TreatAsWithdraw);
    }
    let mut set = BTreeSet::new();
    while buf.remaining() > 0 {
        let mut raw = [0u8; 8];
        buf.copy_to_slice(&mut raw);
        set.insert(raw);
    }
    Ok(set)
}

fn decode_extv6_communities(buf: &mut Bytes) -> Result<BTreeSet<[u8; 20]>, AttrError> {
    if buf.remaining() % 20 != 0 {
        return Err(AttrError::TreatAsWithdraw);
    }
    let mut set = BTreeSet::new();
    while buf.remaining() > 0 {
        let mut raw = [0u8; 20];
        buf.copy_to_slice(&mut raw);
        set.insert(raw);
    }
    Ok(set)
}

fn decode_large_communities(buf: &mut Bytes) -> Result<BTreeSet<(u32, u32, u32)>, AttrError> {
    if buf.remaining() % 12 != 0 {
        return Err(AttrError::TreatAsWithdraw);
    }
    let mut set = BTreeSet::new();
    while buf.remaining() > 0 {
        set.insert((buf.get_u32(), buf.get_u32(), buf.get_u32()));
    }
    Ok(set)
}

fn decode_aigp(buf: &mut Bytes) -> Result<u64, AttrError> {
    // RFC 7311: a TLV stream; we only understand TLV type 1 (AIGP metric).
    while buf.remaining() >= 3 {
        let tlv_type = buf.get_u8();
        let tlv_len = buf.get_u16() as usize;
        if tlv_len < 3 || buf.remaining() < tlv_len - 3 {
            return Err(AttrError::TreatAsWithdraw);
        }
        let mut body = buf.copy_to_bytes(tlv_len - 3);
        if tlv_type == 1 && body.remaining() == 8 {
            return Ok(body.get_u64());
        }
    }
    Err(AttrError::TreatAsWithdraw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Attributes {
        Attributes {
            origin: Some(Origin::Igp),
            as_path: AsPath {
                segments: vec![AsPathSegment {
                    seg_type: AsPathSegmentType::Sequence,
                    members: vec![65001, 65002],
                }],
            },
            nexthop: Some(IpAddr::V4("192.0.2.1".parse().unwrap())),
            local_pref: Some(100),
            communities: Some(BTreeSet::from([0xFFFF_FF01])),
            ..Default::default()
        }
    }

    #[test]
    fn attributes_roundtrip() {
        let attrs = sample();
        let mut buf = BytesMut::new();
        attrs.encode(&mut buf, false);
        let mut b = buf.freeze();
        let (decoded, withdraw) = Attributes::decode(&mut b, false, &BTreeSet::new()).unwrap();
        assert!(!withdraw);
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn malformed_communities_length_triggers_withdraw() {
        let mut buf = BytesMut::new();
        let attrs = sample();
        attrs.encode(&mut buf, false);
        // Overwrite the COMMUNITIES attribute's length byte.
        let mut bytes = buf.to_vec();
        let comm_pos = bytes
            .windows(2)
            .position(|w| w[0] == (AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE).bits() && w[1] == AttrType::Communities as u8)
            .unwrap();
        bytes[comm_pos + 2] = 3; // not a multiple of 4
        bytes.truncate(comm_pos + 3 + 3);
        let mut b = Bytes::from(bytes);
        let (_decoded, withdraw) = Attributes::decode(&mut b, false, &BTreeSet::new()).unwrap();
        assert!(withdraw);
    }

    #[test]
    fn duplicate_attribute_is_session_fatal() {
        let mut buf = BytesMut::new();
        // Two ORIGIN attributes back to back.
        encode_tlv(&mut buf, AttrFlags::TRANSITIVE, AttrType::Origin, |b| b.put_u8(0));
        encode_tlv(&mut buf, AttrFlags::TRANSITIVE, AttrType::Origin, |b| b.put_u8(0));
        let mut b = buf.freeze();
        assert_eq!(
            Attributes::decode(&mut b, false, &BTreeSet::new()).unwrap_err(),
            UpdateMessageError::MalformedAttributeList
        );
    }

    #[test]
    fn unknown_optional_transitive_kept_opaque() {
        // A genuinely unregistered type code (201).
        let mut raw = BytesMut::new();
        raw.put_u8((AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE).bits());
        raw.put_u8(201);
        raw.put_u8(2);
        raw.put_u16(0xBEEF);
        let mut b = raw.clone().freeze();
        let (decoded, withdraw) = Attributes::decode(&mut b, false, &BTreeSet::new()).unwrap();
        assert!(!withdraw);
        assert_eq!(decoded.unknown.len(), 1);
        assert!(decoded.unknown[0].flags.contains(AttrFlags::PARTIAL));

        // Forwarding it back out must preserve the original type code
        // (201), not collapse it to some known `AttrType` variant.
        let mut out = BytesMut::new();
        decoded.encode(&mut out, false);
        assert_eq!(out[1], 201);
        assert_eq!(&out[3..], &raw[3..]);
    }

    #[test]
    fn pack_cache_hits_on_repeat() {
        let cache = PackCache::new(8);
        let attrs = sample();
        let first = cache.pack(&attrs, false);
        let second = cache.pack(&attrs, false);
        assert_eq!(first, second);
    }
}
