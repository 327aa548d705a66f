//
// FlowSpec (RFC 8955/8956) component lists. Component types must appear
// in strictly increasing numeric order (RFC 8955 §4.1); operator/value
// lists are self-describing via the length and end-of-list bits, the way
// DevQps-bgp-rs's `flowspec.rs` decodes them (`find_length`/`is_end_of_list`).
//

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::packet::consts::{FlowSpecComponentType, FlowSpecOpFlags};
use crate::packet::nlri::NlriDecodeError;
use crate::util::bytes_ext::{BytesExt, BytesMutExt};

fn value_len_bits(b: u8) -> u8 {
    1 << ((b & 0x30) >> 4)
}

fn len_flag(nbytes: u8) -> u8 {
    let shift = match nbytes {
        1 => 0,
        2 => 1,
        4 => 2,
        _ => 3,
    };
    shift << 4
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct OpValue {
    pub flags: FlowSpecOpFlags,
    pub value: u32,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum FlowSpecComponent {
    DestinationPrefix(IpNetwork),
    SourcePrefix(IpNetwork),
    IpProtocol(Vec<OpValue>),
    Port(Vec<OpValue>),
    DestinationPort(Vec<OpValue>),
    SourcePort(Vec<OpValue>),
    IcmpType(Vec<OpValue>),
    IcmpCode(Vec<OpValue>),
    TcpFlags(Vec<OpValue>),
    PacketLength(Vec<OpValue>),
    Dscp(Vec<OpValue>),
    Fragment(Vec<OpValue>),
}

impl FlowSpecComponent {
    pub fn component_type(&self) -> FlowSpecComponentType {
        use FlowSpecComponentType::*;
        match self {
            FlowSpecComponent::DestinationPrefix(_) => DestinationPrefix,
            FlowSpecComponent::SourcePrefix(_) => SourcePrefix,
            FlowSpecComponent::IpProtocol(_) => IpProtocol,
            FlowSpecComponent::Port(_) => Port,
            FlowSpecComponent::DestinationPort(_) => DestinationPort,
            FlowSpecComponent::SourcePort(_) => SourcePort,
            FlowSpecComponent::IcmpType(_) => IcmpType,
            FlowSpecComponent::IcmpCode(_) => IcmpCode,
            FlowSpecComponent::TcpFlags(_) => TcpFlags,
            FlowSpecComponent::PacketLength(_) => PacketLength,
            FlowSpecComponent::Dscp(_) => Dscp,
            FlowSpecComponent::Fragment(_) => Fragment,
        }
    }
}

/// A whole FlowSpec rule: a strictly-increasing-by-type list of
/// components (spec.md §4.B edge case: "FlowSpec component ordering must
/// be strictly increasing by component type (violation ⇒ session-reset)").
/// `decode` enforces the ordering itself and returns
/// `NlriDecodeError::FlowSpecOutOfOrder` on violation, which
/// `attribute.rs`'s `MpReachNlri`/`MpUnreachNlri::decode` maps to a
/// session reset rather than folding it into treat-as-withdraw.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FlowSpecRule {
    pub components: Vec<FlowSpecComponent>,
}

impl FlowSpecRule {
    pub fn is_strictly_increasing(&self) -> bool {
        self.components
            .windows(2)
            .all(|w| w[0].component_type() < w[1].component_type())
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        for component in &self.components {
            body.put_u8(component.component_type() as u8);
            match component {
                FlowSpecComponent::DestinationPrefix(p) | FlowSpecComponent::SourcePrefix(p) => {
                    encode_prefix_component(&mut body, p)
                }
                FlowSpecComponent::IpProtocol(v)
                | FlowSpecComponent::Port(v)
                | FlowSpecComponent::DestinationPort(v)
                | FlowSpecComponent::SourcePort(v)
                | FlowSpecComponent::IcmpType(v)
                | FlowSpecComponent::IcmpCode(v)
                | FlowSpecComponent::TcpFlags(v)
                | FlowSpecComponent::PacketLength(v)
                | FlowSpecComponent::Dscp(v)
                | FlowSpecComponent::Fragment(v) => encode_op_values(&mut body, v),
            }
        }
        if body.len() < 240 {
            buf.put_u8(body.len() as u8);
        } else {
            buf.put_u16(body.len() as u16 | 0xF000);
        }
        buf.extend_from_slice(&body);
    }

    pub fn decode(buf: &mut Bytes) -> Result<FlowSpecRule, NlriDecodeError> {
        let first = buf.try_get_u8()?;
        let len = if first & 0xF0 == 0xF0 {
            let second = buf.try_get_u8()?;
            (((first & 0x0F) as usize) << 8) | second as usize
        } else {
            first as usize
        };
        if buf.remaining() < len {
            return Err(NlriDecodeError::Truncated(TryGetError {
                requested: len,
                available: buf.remaining(),
            }));
        }
        let mut body = buf.split_to(len);
        let mut components = vec![];
        while body.has_remaining() {
            let component_type = body.try_get_u8()?;
            let component = match component_type {
                1 => FlowSpecComponent::DestinationPrefix(decode_prefix_component(&mut body)?),
                2 => FlowSpecComponent::SourcePrefix(decode_prefix_component(&mut body)?),
                3 => FlowSpecComponent::IpProtocol(decode_op_values(&mut body)?),
                4 => FlowSpecComponent::Port(decode_op_values(&mut body)?),
                5 => FlowSpecComponent::DestinationPort(decode_op_values(&mut body)?),
                6 => FlowSpecComponent::SourcePort(decode_op_values(&mut body)?),
                7 => FlowSpecComponent::IcmpType(decode_op_values(&mut body)?),
                8 => FlowSpecComponent::IcmpCode(decode_op_values(&mut body)?),
                9 => FlowSpecComponent::TcpFlags(decode_op_values(&mut body)?),
                10 => FlowSpecComponent::PacketLength(decode_op_values(&mut body)?),
                11 => FlowSpecComponent::Dscp(decode_op_values(&mut body)?),
                _ => FlowSpecComponent::Fragment(decode_op_values(&mut body)?),
            };
            components.push(component);
        }
        let rule = FlowSpecRule { components };
        if !rule.is_strictly_increasing() {
            return Err(NlriDecodeError::FlowSpecOutOfOrder);
        }
        Ok(rule)
    }
}

fn encode_prefix_component(buf: &mut BytesMut, p: &IpNetwork) {
    match p {
        IpNetwork::V4(p) => {
            buf.put_u8(p.prefix());
            buf.put_prefix_bytes(p.prefix(), &p.ip().octets());
        }
        IpNetwork::V6(p) => {
            buf.put_u8(p.prefix());
            buf.put_u8(0);
            buf.put_prefix_bytes(p.prefix(), &p.ip().octets());
        }
    }
}

fn decode_prefix_component(buf: &mut Bytes) -> Result<IpNetwork, TryGetError> {
    let prefix_len = buf.try_get_u8()?;
    if prefix_len > 32 {
        let _offset = buf.try_get_u8()?;
        let octets = buf.try_get_prefix_bytes(prefix_len, 128)?;
        let mut raw = [0u8; 16];
        raw[..octets.len()].copy_from_slice(&octets);
        return Ok(IpNetwork::V6(
            Ipv6Network::new(std::net::Ipv6Addr::from(raw), prefix_len)
                .map_err(|_| TryGetError { requested: 1, available: 0 })?,
        ));
    }
    let octets = buf.try_get_prefix_bytes(prefix_len, 32)?;
    Ok(IpNetwork::V4(
        Ipv4Network::new(
            std::net::Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]),
            prefix_len,
        )
        .map_err(|_| TryGetError { requested: 1, available: 0 })?,
    ))
}

fn encode_op_values(buf: &mut BytesMut, values: &[OpValue]) {
    for (i, v) in values.iter().enumerate() {
        let nbytes = if v.value > 0xFFFF {
            4
        } else if v.value > 0xFF {
            2
        } else {
            1
        };
        let mut flags = v.flags.bits() & !0x30;
        flags |= len_flag(nbytes);
        if i == values.len() - 1 {
            flags |= FlowSpecOpFlags::END_OF_LIST.bits();
        }
        buf.put_u8(flags);
        match nbytes {
            1 => buf.put_u8(v.value as u8),
            2 => buf.put_u16(v.value as u16),
            _ => buf.put_u32(v.value),
        }
    }
}

fn decode_op_values(buf: &mut Bytes) -> Result<Vec<OpValue>, TryGetError> {
    let mut values = vec![];
    loop {
        let raw_flags = buf.try_get_u8()?;
        let nbytes = value_len_bits(raw_flags);
        let value = match nbytes {
            1 => buf.try_get_u8()? as u32,
            2 => buf.try_get_u16()? as u32,
            _ => buf.try_get_u32()?,
        };
        let flags = FlowSpecOpFlags::from_bits_truncate(raw_flags & !0x30);
        let end = flags.contains(FlowSpecOpFlags::END_OF_LIST);
        values.push(OpValue { flags, value });
        if end {
            break;
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_prefix_roundtrip() {
        let rule = FlowSpecRule {
            components: vec![FlowSpecComponent::DestinationPrefix(
                "203.0.113.0/24".parse::<IpNetwork>().unwrap(),
            )],
        };
        assert!(rule.is_strictly_increasing());
        let mut buf = BytesMut::new();
        rule.encode(&mut buf);
        let mut b = buf.freeze();
        assert_eq!(FlowSpecRule::decode(&mut b).unwrap(), rule);
    }

    #[test]
    fn op_value_list_roundtrip() {
        let rule = FlowSpecRule {
            components: vec![FlowSpecComponent::Port(vec![
                OpValue { flags: FlowSpecOpFlags::EQUAL, value: 80 },
                OpValue {
                    flags: FlowSpecOpFlags::EQUAL | FlowSpecOpFlags::AND,
                    value: 443,
                },
            ])],
        };
        let mut buf = BytesMut::new();
        rule.encode(&mut buf);
        let mut b = buf.freeze();
        assert_eq!(FlowSpecRule::decode(&mut b).unwrap(), rule);
    }

    #[test]
    fn out_of_order_components_detected() {
        let rule = FlowSpecRule {
            components: vec![
                FlowSpecComponent::Port(vec![OpValue { flags: FlowSpecOpFlags::EQUAL, value: 1 }]),
                FlowSpecComponent::DestinationPrefix("10.0.0.0/8".parse().unwrap()),
            ],
        };
        assert!(!rule.is_strictly_increasing());
    }

    #[test]
    fn decode_rejects_out_of_order_components() {
        let rule = FlowSpecRule {
            components: vec![
                FlowSpecComponent::Port(vec![OpValue { flags: FlowSpecOpFlags::EQUAL, value: 1 }]),
                FlowSpecComponent::DestinationPrefix("10.0.0.0/8".parse().unwrap()),
            ],
        };
        let mut buf = BytesMut::new();
        rule.encode(&mut buf);
        let mut b = buf.freeze();
        assert!(matches!(FlowSpecRule::decode(&mut b), Err(NlriDecodeError::FlowSpecOutOfOrder)));
    }
}
