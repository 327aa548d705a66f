//
// Session negotiation (spec.md §4.E). Pure function over the two OPEN
// messages exchanged during the handshake; produces the immutable
// `Negotiated` that every codec call for the rest of the session consults.
// Grounded in holo-bgp's `Neighbor::session_init` (neighbor.rs), generalized
// past its IPv4/IPv6-unicast-only capability intersection to the full
// family registry and to directional ADD-PATH (RFC 7911).
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::packet::capability::{AddPathMode, Capability, GracefulRestart};
use crate::packet::consts::OpenMessageErrorSubcode;
use crate::packet::message::{DecodeCxt, EncodeCxt, OpenMsg};
use crate::packet::nlri::Family;

/// The post-OPEN agreement (spec.md §3). Created once per established
/// session; every subsequent codec call borrows it rather than
/// re-deriving anything from the raw capability sets.
#[derive(Clone, Debug)]
pub struct Negotiated {
    pub local_asn: u32,
    pub remote_asn: u32,
    pub remote_identifier: Ipv4Addr,
    /// 0 disables the hold/keepalive timers entirely.
    pub holdtime: u16,
    pub keepalive: u16,
    pub four_byte_asn: bool,
    /// Families the remote side may send us reachability for.
    pub families_in: BTreeSet<Family>,
    /// Families we may send reachability for.
    pub families_out: BTreeSet<Family>,
    /// Families for which we attach a path-id when sending.
    pub addpath_send: BTreeSet<Family>,
    /// Families for which we expect a path-id when receiving.
    pub addpath_recv: BTreeSet<Family>,
    pub extended_message: bool,
    pub route_refresh: bool,
    pub enhanced_route_refresh: bool,
    /// The remote side's graceful-restart capability, if offered
    /// (spec.md SUPPLEMENTED FEATURES: decoded in full even though only
    /// the restart flag feeds the reactor's stale-route sweep today).
    pub graceful_restart: Option<GracefulRestart>,
}

/// Semantic validation failures that have no home in `DecodeError`
/// because they depend on configuration, not just the bytes on the wire
/// (spec.md §4.E).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationError {
    BadPeerAs,
    BadBgpIdentifier,
}

impl From<ValidationError> for OpenMessageErrorSubcode {
    fn from(e: ValidationError) -> OpenMessageErrorSubcode {
        match e {
            ValidationError::BadPeerAs => OpenMessageErrorSubcode::BadPeerAs,
            ValidationError::BadBgpIdentifier => {
                OpenMessageErrorSubcode::BadBgpIdentifier
            }
        }
    }
}

impl Negotiated {
    /// Context for decoding messages received from this peer.
    pub fn decode_cxt(&self) -> DecodeCxt {
        DecodeCxt {
            four_byte_asn: self.four_byte_asn,
            addpath_rx: self.addpath_recv.clone(),
            extended_message: self.extended_message,
        }
    }

    /// Context for encoding messages sent to this peer.
    pub fn encode_cxt(&self) -> EncodeCxt {
        EncodeCxt {
            four_byte_asn: self.four_byte_asn,
            addpath_tx: self.addpath_send.clone(),
            extended_message: self.extended_message,
            extended_opt_params: false,
        }
    }
}

/// Confirms the received OPEN actually matches what this neighbor was
/// configured for. Syntactic errors (bad version, bad hold-time, malformed
/// identifier) are already rejected by `OpenMsg::decode`; this only checks
/// what decode can't know: the configured peer ASN and our own identifier.
pub fn validate(
    remote: &OpenMsg,
    configured_peer_as: u32,
    local_identifier: Ipv4Addr,
) -> Result<(), ValidationError> {
    if remote.real_as() != configured_peer_as {
        return Err(ValidationError::BadPeerAs);
    }
    if remote.identifier == local_identifier {
        return Err(ValidationError::BadBgpIdentifier);
    }
    Ok(())
}

fn multiprotocol_families(open: &OpenMsg) -> BTreeSet<Family> {
    open.capabilities
        .iter()
        .filter_map(|cap| match cap {
            Capability::MultiProtocol { afi, safi } => Some(Family::new(*afi, *safi)),
            _ => None,
        })
        .collect()
}

fn addpath_tuples(open: &OpenMsg) -> Vec<(Family, AddPathMode)> {
    open.capabilities
        .iter()
        .filter_map(|cap| match cap {
            Capability::AddPath(tuples) => Some(tuples),
            _ => None,
        })
        .flatten()
        .map(|t| (Family::new(t.afi, t.safi), t.mode))
        .collect()
}

fn can_send(mode: AddPathMode) -> bool {
    matches!(mode, AddPathMode::Send | AddPathMode::ReceiveSend)
}

fn can_receive(mode: AddPathMode) -> bool {
    matches!(mode, AddPathMode::Receive | AddPathMode::ReceiveSend)
}

/// Negotiates a session from the two exchanged OPENs. `local` is the OPEN
/// we sent (our own configured offer); `remote` is what the peer sent
/// back. Every field the Testable Properties section (spec.md §8) calls
/// symmetric is computed the same way regardless of which side calls this.
pub fn negotiate(local: &OpenMsg, remote: &OpenMsg) -> Negotiated {
    let holdtime = local.holdtime.min(remote.holdtime);
    let keepalive = if holdtime == 0 { 0 } else { holdtime / 3 };

    let local_families = multiprotocol_families(local);
    let remote_families = multiprotocol_families(remote);
    let families_in: BTreeSet<_> =
        local_families.intersection(&remote_families).copied().collect();
    let families_out = families_in.clone();

    let local_addpath = addpath_tuples(local);
    let remote_addpath = addpath_tuples(remote);
    let mut addpath_send = BTreeSet::new();
    let mut addpath_recv = BTreeSet::new();
    for (family, local_mode) in &local_addpath {
        let Some((_, remote_mode)) =
            remote_addpath.iter().find(|(f, _)| f == family)
        else {
            continue;
        };
        if can_send(*local_mode) && can_receive(*remote_mode) {
            addpath_send.insert(*family);
        }
        if can_receive(*local_mode) && can_send(*remote_mode) {
            addpath_recv.insert(*family);
        }
    }

    let four_byte_asn = local
        .capabilities
        .iter()
        .any(|c| matches!(c, Capability::FourOctetAsNumber { .. }))
        && remote
            .capabilities
            .iter()
            .any(|c| matches!(c, Capability::FourOctetAsNumber { .. }));

    let route_refresh =
        local.capabilities.contains(&Capability::RouteRefresh)
            && remote.capabilities.contains(&Capability::RouteRefresh);
    let enhanced_route_refresh = local
        .capabilities
        .contains(&Capability::EnhancedRouteRefresh)
        && remote.capabilities.contains(&Capability::EnhancedRouteRefresh);
    let extended_message = local.capabilities.contains(&Capability::ExtendedMessage)
        && remote.capabilities.contains(&Capability::ExtendedMessage);

    let graceful_restart = remote.capabilities.iter().find_map(|c| match c {
        Capability::GracefulRestart(gr) => Some(gr.clone()),
        _ => None,
    });

    Negotiated {
        local_asn: local.real_as(),
        remote_asn: remote.real_as(),
        remote_identifier: remote.identifier,
        holdtime,
        keepalive,
        four_byte_asn,
        families_in,
        families_out,
        addpath_send,
        addpath_recv,
        extended_message,
        route_refresh,
        enhanced_route_refresh,
        graceful_restart,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::packet::capability::AddPathTuple;
    use crate::packet::consts::{Afi, Safi};

    fn open(
        my_as: u16,
        holdtime: u16,
        identifier: &str,
        caps: BTreeSet<Capability>,
    ) -> OpenMsg {
        OpenMsg {
            version: 4,
            my_as,
            holdtime,
            identifier: identifier.parse().unwrap(),
            capabilities: caps,
        }
    }

    #[test]
    fn scenario_asn4_and_addpath() {
        let local = open(
            23456,
            180,
            "192.0.2.1",
            BTreeSet::from([
                Capability::FourOctetAsNumber { asn: 4_200_000_000 },
                Capability::MultiProtocol { afi: Afi::Ipv4, safi: Safi::Unicast },
                Capability::RouteRefresh,
                Capability::AddPath(BTreeSet::from([AddPathTuple {
                    afi: Afi::Ipv4,
                    safi: Safi::Unicast,
                    mode: AddPathMode::ReceiveSend,
                }])),
            ]),
        );
        let remote = open(
            23456,
            90,
            "192.0.2.2",
            BTreeSet::from([
                Capability::FourOctetAsNumber { asn: 4_200_000_001 },
                Capability::MultiProtocol { afi: Afi::Ipv4, safi: Safi::Unicast },
                Capability::AddPath(BTreeSet::from([AddPathTuple {
                    afi: Afi::Ipv4,
                    safi: Safi::Unicast,
                    mode: AddPathMode::Receive,
                }])),
            ]),
        );

        let nego = negotiate(&local, &remote);
        assert_eq!(nego.local_asn, 4_200_000_000);
        assert_eq!(nego.remote_asn, 4_200_000_001);
        assert_eq!(nego.holdtime, 90);
        assert_eq!(nego.keepalive, 30);
        assert_eq!(nego.families_in, BTreeSet::from([Family::IPV4_UNICAST]));
        assert_eq!(nego.families_out, BTreeSet::from([Family::IPV4_UNICAST]));
        assert!(nego.addpath_send.contains(&Family::IPV4_UNICAST));
        assert!(!nego.addpath_recv.contains(&Family::IPV4_UNICAST));
    }

    #[test]
    fn symmetric_fields_are_order_independent() {
        let a = open(
            65001,
            180,
            "192.0.2.1",
            BTreeSet::from([Capability::MultiProtocol {
                afi: Afi::Ipv6,
                safi: Safi::Unicast,
            }]),
        );
        let b = open(
            65002,
            60,
            "192.0.2.2",
            BTreeSet::from([Capability::MultiProtocol {
                afi: Afi::Ipv6,
                safi: Safi::Unicast,
            }]),
        );
        let ab = negotiate(&a, &b);
        let ba = negotiate(&b, &a);
        assert_eq!(ab.holdtime, ba.holdtime);
        assert_eq!(ab.families_in, ba.families_in);
        assert_eq!(ab.families_out, ba.families_out);
    }

    #[test]
    fn holdtime_zero_disables_keepalive() {
        let a = open(65001, 0, "192.0.2.1", BTreeSet::new());
        let b = open(65002, 180, "192.0.2.2", BTreeSet::new());
        let nego = negotiate(&a, &b);
        assert_eq!(nego.holdtime, 0);
        assert_eq!(nego.keepalive, 0);
    }

    #[test]
    fn bad_peer_as_rejected() {
        let remote = open(65002, 90, "192.0.2.2", BTreeSet::new());
        assert_eq!(
            validate(&remote, 65003, "192.0.2.1".parse().unwrap()),
            Err(ValidationError::BadPeerAs)
        );
    }

    #[test]
    fn identifier_collision_rejected() {
        let remote = open(65002, 90, "192.0.2.1", BTreeSet::new());
        assert_eq!(
            validate(&remote, 65002, "192.0.2.1".parse().unwrap()),
            Err(ValidationError::BadBgpIdentifier)
        );
    }
}
