//
// EVPN (RFC 7432) route types 1-5, under AFI L2VPN / SAFI EVPN. Each
// route type has its own fixed-width layout, so this is a closed enum
// rather than a TLV stream — mirrors the framing zettabgp's afi/mod.rs
// uses for its own fixed-shape NLRI variants (BgpAddrs::EVPN).
//

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use serde::{Deserialize, Serialize};

use crate::packet::nlri::{MplsLabelStack, RouteDistinguisher};
use crate::util::bytes_ext::{BytesExt, BytesMutExt};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct EthernetSegmentId(pub [u8; 10]);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct MacAddress(pub [u8; 6]);

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum EvpnRoute {
    /// Route Type 1: Ethernet Auto-Discovery.
    EthernetAutoDiscovery {
        rd: RouteDistinguisher,
        esi: EthernetSegmentId,
        ethernet_tag_id: u32,
        label: MplsLabelStack,
    },
    /// Route Type 2: MAC/IP Advertisement.
    MacIpAdvertisement {
        rd: RouteDistinguisher,
        esi: EthernetSegmentId,
        ethernet_tag_id: u32,
        mac: MacAddress,
        ip: Option<std::net::IpAddr>,
        labels: MplsLabelStack,
    },
    /// Route Type 3: Inclusive Multicast Ethernet Tag.
    InclusiveMulticastEthernetTag {
        rd: RouteDistinguisher,
        ethernet_tag_id: u32,
        originator: std::net::IpAddr,
    },
    /// Route Type 4: Ethernet Segment.
    EthernetSegment {
        rd: RouteDistinguisher,
        esi: EthernetSegmentId,
        originator: std::net::IpAddr,
    },
    /// Route Type 5: IP Prefix.
    IpPrefix {
        rd: RouteDistinguisher,
        esi: EthernetSegmentId,
        ethernet_tag_id: u32,
        prefix: ipnetwork::IpNetwork,
        gateway: std::net::IpAddr,
        label: MplsLabelStack,
    },
    /// Unrecognized route type (spec.md §4.B edge case): kept opaque so
    /// the session survives rather than being torn down or misdecoded.
    Unknown { route_type: u8, value: Vec<u8> },
}

impl EvpnRoute {
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        let route_type: u8 = match self {
            EvpnRoute::EthernetAutoDiscovery { rd, esi, ethernet_tag_id, label } => {
                rd.encode(&mut body);
                body.put_slice(&esi.0);
                body.put_u32(*ethernet_tag_id);
                label.encode(&mut body);
                1
            }
            EvpnRoute::MacIpAdvertisement { rd, esi, ethernet_tag_id, mac, ip, labels } => {
                rd.encode(&mut body);
                body.put_slice(&esi.0);
                body.put_u32(*ethernet_tag_id);
                body.put_u8(48);
                body.put_slice(&mac.0);
                match ip {
                    Some(std::net::IpAddr::V4(addr)) => {
                        body.put_u8(32);
                        body.put_ipv4(addr);
                    }
                    Some(std::net::IpAddr::V6(addr)) => {
                        body.put_u8(128);
                        body.put_ipv6(addr);
                    }
                    None => body.put_u8(0),
                }
                labels.encode(&mut body);
                2
            }
            EvpnRoute::InclusiveMulticastEthernetTag { rd, ethernet_tag_id, originator } => {
                rd.encode(&mut body);
                body.put_u32(*ethernet_tag_id);
                put_originator(&mut body, *originator);
                3
            }
            EvpnRoute::EthernetSegment { rd, esi, originator } => {
                rd.encode(&mut body);
                body.put_slice(&esi.0);
                put_originator(&mut body, *originator);
                4
            }
            EvpnRoute::IpPrefix { rd, esi, ethernet_tag_id, prefix, gateway, label } => {
                rd.encode(&mut body);
                body.put_slice(&esi.0);
                body.put_u32(*ethernet_tag_id);
                body.put_u8(prefix.prefix());
                match prefix {
                    ipnetwork::IpNetwork::V4(p) => {
                        let mut raw = [0u8; 16];
                        raw[..4].copy_from_slice(&p.ip().octets());
                        body.put_slice(&raw);
                    }
                    ipnetwork::IpNetwork::V6(p) => body.put_slice(&p.ip().octets()),
                }
                body.put_ip(gateway);
                label.encode(&mut body);
                5
            }
            EvpnRoute::Unknown { route_type, value } => {
                body.put_slice(value);
                *route_type
            }
        };
        buf.put_u8(route_type);
        buf.put_u8(body.len() as u8);
        buf.extend_from_slice(&body);
    }

    pub fn decode(buf: &mut Bytes) -> Result<EvpnRoute, TryGetError> {
        let route_type = buf.try_get_u8()?;
        let len = buf.try_get_u8()? as usize;
        if buf.remaining() < len {
            return Err(TryGetError { requested: len, available: buf.remaining() });
        }
        let mut body = buf.split_to(len);
        let route = match route_type {
            1 => EvpnRoute::EthernetAutoDiscovery {
                rd: RouteDistinguisher::decode(&mut body)?,
                esi: get_esi(&mut body)?,
                ethernet_tag_id: body.try_get_u32()?,
                label: MplsLabelStack::decode(&mut body)?,
            },
            2 => {
                let rd = RouteDistinguisher::decode(&mut body)?;
                let esi = get_esi(&mut body)?;
                let ethernet_tag_id = body.try_get_u32()?;
                let _mac_len = body.try_get_u8()?;
                let mut mac = [0u8; 6];
                body.try_copy_to_slice(&mut mac)?;
                let ip_len = body.try_get_u8()?;
                let ip = match ip_len {
                    32 => Some(std::net::IpAddr::V4(body.try_get_ipv4()?)),
                    128 => Some(std::net::IpAddr::V6(body.try_get_ipv6()?)),
                    _ => None,
                };
                let labels = MplsLabelStack::decode(&mut body)?;
                EvpnRoute::MacIpAdvertisement {
                    rd,
                    esi,
                    ethernet_tag_id,
                    mac: MacAddress(mac),
                    ip,
                    labels,
                }
            }
            3 => EvpnRoute::InclusiveMulticastEthernetTag {
                rd: RouteDistinguisher::decode(&mut body)?,
                ethernet_tag_id: body.try_get_u32()?,
                originator: get_originator(&mut body)?,
            },
            4 => EvpnRoute::EthernetSegment {
                rd: RouteDistinguisher::decode(&mut body)?,
                esi: get_esi(&mut body)?,
                originator: get_originator(&mut body)?,
            },
            5 => {
                let rd = RouteDistinguisher::decode(&mut body)?;
                let esi = get_esi(&mut body)?;
                let ethernet_tag_id = body.try_get_u32()?;
                let prefix_len = body.try_get_u8()?;
                let mut raw = [0u8; 16];
                body.try_copy_to_slice(&mut raw)?;
                let prefix = if prefix_len <= 32 {
                    ipnetwork::IpNetwork::V4(
                        ipnetwork::Ipv4Network::new(
                            std::net::Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]),
                            prefix_len,
                        )
                        .map_err(|_| TryGetError { requested: 1, available: 0 })?,
                    )
                } else {
                    ipnetwork::IpNetwork::V6(
                        ipnetwork::Ipv6Network::new(std::net::Ipv6Addr::from(raw), prefix_len)
                            .map_err(|_| TryGetError { requested: 1, available: 0 })?,
                    )
                };
                let gateway = get_originator(&mut body)?;
                let label = MplsLabelStack::decode(&mut body)?;
                EvpnRoute::IpPrefix { rd, esi, ethernet_tag_id, prefix, gateway, label }
            }
            // Unknown route type (spec.md §4.B): keep opaque, don't tear
            // down the session over a route type we don't recognize yet.
            other => EvpnRoute::Unknown { route_type: other, value: body.to_vec() },
        };
        Ok(route)
    }
}

fn put_originator(buf: &mut BytesMut, addr: std::net::IpAddr) {
    match addr {
        std::net::IpAddr::V4(addr) => {
            buf.put_u8(4);
            buf.put_ipv4(&addr);
        }
        std::net::IpAddr::V6(addr) => {
            buf.put_u8(16);
            buf.put_ipv6(&addr);
        }
    }
}

fn get_originator(buf: &mut Bytes) -> Result<std::net::IpAddr, TryGetError> {
    let len = buf.try_get_u8()?;
    match len {
        4 => Ok(std::net::IpAddr::V4(buf.try_get_ipv4()?)),
        _ => Ok(std::net::IpAddr::V6(buf.try_get_ipv6()?)),
    }
}

fn get_esi(buf: &mut Bytes) -> Result<EthernetSegmentId, TryGetError> {
    let mut esi = [0u8; 10];
    buf.try_copy_to_slice(&mut esi)?;
    Ok(EthernetSegmentId(esi))
}
