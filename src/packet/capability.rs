//
// OPEN capabilities (RFC 5492 and friends). Grounded in holo-bgp's
// `Capability`/`NegotiatedCapability` split in packet/message.rs: the full
// `Capability` carries everything received on the wire, while
// `NegotiatedCapability` is the stripped-down form actually used once
// negotiation (negotiate.rs) has run.
//

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use enum_as_inner::EnumAsInner;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::consts::{Afi, CapabilityCode, Safi};

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, EnumAsInner, Deserialize, Serialize)]
pub enum Capability {
    MultiProtocol { afi: Afi, safi: Safi },
    FourOctetAsNumber { asn: u32 },
    AddPath(BTreeSet<AddPathTuple>),
    RouteRefresh,
    EnhancedRouteRefresh,
    ExtendedMessage,
    // RFC 9234.
    BgpRole(BgpRole),
    GracefulRestart(GracefulRestart),
    // draft-ietf-idr-version-capability: opaque version string, forwarded
    // to external processes but never interpreted locally.
    SoftwareVersion(String),
    Unknown { code: u8, value: Vec<u8> },
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum BgpRole {
    Provider = 0,
    Rs = 1,
    RsClient = 2,
    Customer = 3,
    Peer = 4,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct GracefulRestart {
    pub restarting: bool,
    pub restart_time: Duration,
    pub families: BTreeSet<(Afi, Safi, bool)>,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AddPathMode {
    Receive = 1,
    Send = 2,
    ReceiveSend = 3,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct AddPathTuple {
    pub afi: Afi,
    pub safi: Safi,
    pub mode: AddPathMode,
}

/// Stripped-down view of a capability, containing only what matters to
/// negotiation (negotiate.rs). Mirrors holo-bgp's `NegotiatedCapability`.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, EnumAsInner, Deserialize, Serialize)]
pub enum NegotiatedCapability {
    MultiProtocol { afi: Afi, safi: Safi },
    FourOctetAsNumber,
    AddPath,
    RouteRefresh,
    EnhancedRouteRefresh,
    ExtendedMessage,
    GracefulRestart,
}

impl Capability {
    /// Encodes one capability TLV (code, length, value) as carried inside
    /// an OPEN optional parameter (RFC 5492).
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut value = BytesMut::new();
        let code = match self {
            Capability::MultiProtocol { afi, safi } => {
                value.put_u16(*afi as u16);
                value.put_u8(0);
                value.put_u8(*safi as u8);
                CapabilityCode::MultiProtocol
            }
            Capability::FourOctetAsNumber { asn } => {
                value.put_u32(*asn);
                CapabilityCode::FourOctetAsNumber
            }
            Capability::AddPath(tuples) => {
                for t in tuples {
                    value.put_u16(t.afi as u16);
                    value.put_u8(t.safi as u8);
                    value.put_u8(t.mode as u8);
                }
                CapabilityCode::AddPath
            }
            Capability::RouteRefresh => CapabilityCode::RouteRefresh,
            Capability::EnhancedRouteRefresh => CapabilityCode::EnhancedRouteRefresh,
            Capability::ExtendedMessage => CapabilityCode::ExtendedMessage,
            Capability::BgpRole(role) => {
                value.put_u8(*role as u8);
                CapabilityCode::BgpRole
            }
            Capability::GracefulRestart(gr) => {
                let mut flags_time: u16 = gr.restart_time.as_secs().min(4095) as u16;
                if gr.restarting {
                    flags_time |= 0x8000;
                }
                value.put_u16(flags_time);
                for (afi, safi, forwarding_preserved) in &gr.families {
                    value.put_u16(*afi as u16);
                    value.put_u8(*safi as u8);
                    value.put_u8(if *forwarding_preserved { 0x80 } else { 0 });
                }
                CapabilityCode::GracefulRestart
            }
            Capability::SoftwareVersion(version) => {
                value.put_u8(version.len() as u8);
                value.put_slice(version.as_bytes());
                CapabilityCode::SoftwareVersion
            }
            Capability::Unknown { code, value: raw } => {
                value.put_slice(raw);
                buf.put_u8(*code);
                buf.put_u8(value.len() as u8);
                buf.extend_from_slice(&value);
                return;
            }
        };
        buf.put_u8(code as u8);
        buf.put_u8(value.len() as u8);
        buf.extend_from_slice(&value);
    }

    /// Decodes one capability TLV. Unknown codes (and malformed known
    /// ones) fall back to `Unknown` rather than aborting the OPEN decode —
    /// a peer offering a capability we don't understand isn't grounds to
    /// reject the session (RFC 5492 treats capability support as
    /// per-capability, negotiate.rs just won't use it).
    pub fn decode(buf: &mut Bytes) -> Result<Capability, TryGetError> {
        let code_raw = buf.try_get_u8()?;
        let len = buf.try_get_u8()? as usize;
        if buf.remaining() < len {
            return Err(TryGetError { requested: len, available: buf.remaining() });
        }
        let mut value = buf.copy_to_bytes(len);
        let fallback = |code, mut value: Bytes| Capability::Unknown {
            code,
            value: value.copy_to_bytes(value.remaining()).to_vec(),
        };

        let Some(code) = CapabilityCode::from_u8(code_raw) else {
            return Ok(fallback(code_raw, value));
        };
        let cap = match code {
            CapabilityCode::MultiProtocol => {
                if value.remaining() < 4 {
                    return Ok(fallback(code_raw, value));
                }
                let afi = Afi::from_u16(value.get_u16()).unwrap_or(Afi::Ipv4);
                let _reserved = value.get_u8();
                let safi = Safi::from_u8(value.get_u8()).unwrap_or(Safi::Unicast);
                Capability::MultiProtocol { afi, safi }
            }
            CapabilityCode::FourOctetAsNumber => {
                if value.remaining() != 4 {
                    return Ok(fallback(code_raw, value));
                }
                Capability::FourOctetAsNumber { asn: value.get_u32() }
            }
            CapabilityCode::AddPath => {
                if value.remaining() % 4 != 0 {
                    return Ok(fallback(code_raw, value));
                }
                let mut tuples = BTreeSet::new();
                while value.remaining() > 0 {
                    let afi = Afi::from_u16(value.get_u16()).unwrap_or(Afi::Ipv4);
                    let safi = Safi::from_u8(value.get_u8()).unwrap_or(Safi::Unicast);
                    let Some(mode) = AddPathMode::from_u8(value.get_u8()) else { continue };
                    tuples.insert(AddPathTuple { afi, safi, mode });
                }
                Capability::AddPath(tuples)
            }
            CapabilityCode::RouteRefresh | CapabilityCode::RouteRefreshCisco => {
                Capability::RouteRefresh
            }
            CapabilityCode::EnhancedRouteRefresh => Capability::EnhancedRouteRefresh,
            CapabilityCode::ExtendedMessage => Capability::ExtendedMessage,
            CapabilityCode::ExtendedNextHop => return Ok(fallback(code_raw, value)),
            CapabilityCode::BgpRole => {
                if value.remaining() != 1 {
                    return Ok(fallback(code_raw, value));
                }
                let Some(role) = BgpRole::from_u8(value.get_u8()) else {
                    return Ok(fallback(code_raw, value));
                };
                Capability::BgpRole(role)
            }
            CapabilityCode::GracefulRestart => {
                if value.remaining() < 2 {
                    return Ok(fallback(code_raw, value));
                }
                let flags_time = value.get_u16();
                let restarting = flags_time & 0x8000 != 0;
                let restart_time = Duration::from_secs((flags_time & 0x0FFF) as u64);
                let mut families = BTreeSet::new();
                while value.remaining() >= 4 {
                    let afi = Afi::from_u16(value.get_u16()).unwrap_or(Afi::Ipv4);
                    let safi = Safi::from_u8(value.get_u8()).unwrap_or(Safi::Unicast);
                    let forwarding_preserved = value.get_u8() & 0x80 != 0;
                    families.insert((afi, safi, forwarding_preserved));
                }
                Capability::GracefulRestart(GracefulRestart { restarting, restart_time, families })
            }
            CapabilityCode::SoftwareVersion => {
                if value.remaining() < 1 {
                    return Ok(fallback(code_raw, value));
                }
                let len = value.get_u8() as usize;
                if value.remaining() < len {
                    return Ok(fallback(code_raw, value));
                }
                let raw = value.copy_to_bytes(len);
                match String::from_utf8(raw.to_vec()) {
                    Ok(s) => Capability::SoftwareVersion(s),
                    Err(_) => return Ok(fallback(code_raw, value)),
                }
            }
        };
        Ok(cap)
    }

    pub fn to_negotiated(&self) -> Option<NegotiatedCapability> {
        match self {
            Capability::MultiProtocol { afi, safi } => {
                Some(NegotiatedCapability::MultiProtocol { afi: *afi, safi: *safi })
            }
            Capability::FourOctetAsNumber { .. } => {
                Some(NegotiatedCapability::FourOctetAsNumber)
            }
            Capability::AddPath(_) => Some(NegotiatedCapability::AddPath),
            Capability::RouteRefresh => Some(NegotiatedCapability::RouteRefresh),
            Capability::EnhancedRouteRefresh => {
                Some(NegotiatedCapability::EnhancedRouteRefresh)
            }
            Capability::ExtendedMessage => Some(NegotiatedCapability::ExtendedMessage),
            Capability::GracefulRestart(_) => Some(NegotiatedCapability::GracefulRestart),
            Capability::BgpRole(_)
            | Capability::SoftwareVersion(_)
            | Capability::Unknown { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(cap: Capability) {
        let mut buf = BytesMut::new();
        cap.encode(&mut buf);
        let mut b = buf.freeze();
        assert_eq!(Capability::decode(&mut b).unwrap(), cap);
    }

    #[test]
    fn multiprotocol_roundtrip() {
        roundtrip(Capability::MultiProtocol { afi: Afi::Ipv6, safi: Safi::Unicast });
    }

    #[test]
    fn four_octet_asn_roundtrip() {
        roundtrip(Capability::FourOctetAsNumber { asn: 4_200_000_000 });
    }

    #[test]
    fn graceful_restart_roundtrip() {
        roundtrip(Capability::GracefulRestart(GracefulRestart {
            restarting: true,
            restart_time: Duration::from_secs(120),
            families: BTreeSet::from([(Afi::Ipv4, Safi::Unicast, true)]),
        }));
    }

    #[test]
    fn software_version_roundtrip() {
        roundtrip(Capability::SoftwareVersion("bgpd/1.0".to_string()));
    }

    #[test]
    fn unknown_capability_kept_opaque() {
        roundtrip(Capability::Unknown { code: 200, value: vec![1, 2, 3] });
    }

    #[test]
    fn malformed_known_capability_falls_back_to_unknown() {
        // AddPath capability whose value length isn't a multiple of 4.
        let mut buf = BytesMut::new();
        buf.put_u8(CapabilityCode::AddPath as u8);
        buf.put_u8(3);
        buf.put_slice(&[0, 1, 2]);
        let mut b = buf.freeze();
        let decoded = Capability::decode(&mut b).unwrap();
        assert!(matches!(decoded, Capability::Unknown { code: 69, .. }));
    }
}
