//
// Wire-level byte helpers shared by every codec in `packet`.
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};

/// Extension methods for reading fixed-width fields out of `Bytes`.
pub trait BytesExt {
    /// Reads an unsigned 24-bit integer in big-endian order.
    fn try_get_u24(&mut self) -> Result<u32, TryGetError>;

    /// Reads an IPv4 address in big-endian order.
    fn try_get_ipv4(&mut self) -> Result<Ipv4Addr, TryGetError>;

    /// Reads an IPv6 address in big-endian order.
    fn try_get_ipv6(&mut self) -> Result<Ipv6Addr, TryGetError>;

    /// Reads `n` bytes as a prefix address, zero-padded to the address
    /// width. Used for the shortest-bytes prefix encoding (`ceil(mask/8)`
    /// bytes) common to every NLRI family.
    fn try_get_prefix_bytes(
        &mut self,
        prefix_bits: u8,
        addr_bits: u8,
    ) -> Result<Bytes, TryGetError>;
}

impl BytesExt for Bytes {
    fn try_get_u24(&mut self) -> Result<u32, TryGetError> {
        let mut n = [0u8; 4];
        self.try_copy_to_slice(&mut n[1..=3])?;
        Ok(u32::from_be_bytes(n))
    }

    fn try_get_ipv4(&mut self) -> Result<Ipv4Addr, TryGetError> {
        Ok(Ipv4Addr::from(self.try_get_u32()?))
    }

    fn try_get_ipv6(&mut self) -> Result<Ipv6Addr, TryGetError> {
        Ok(Ipv6Addr::from(self.try_get_u128()?))
    }

    fn try_get_prefix_bytes(
        &mut self,
        prefix_bits: u8,
        addr_bits: u8,
    ) -> Result<Bytes, TryGetError> {
        let addr_bytes = (addr_bits / 8) as usize;
        if prefix_bits > addr_bits {
            return Err(TryGetError {
                requested: (prefix_bits as usize).div_ceil(8),
                available: addr_bytes,
            });
        }
        let nbytes = prefix_bits.div_ceil(8) as usize;
        if self.remaining() < nbytes {
            return Err(TryGetError {
                requested: nbytes,
                available: self.remaining(),
            });
        }
        let mut out = vec![0u8; addr_bytes];
        self.copy_to_slice(&mut out[..nbytes]);
        Ok(Bytes::from(out))
    }
}

/// Extension methods for writing fixed-width fields into `BytesMut`.
pub trait BytesMutExt {
    fn put_u24(&mut self, n: u32);
    fn put_ip(&mut self, addr: &IpAddr);
    fn put_ipv4(&mut self, addr: &Ipv4Addr);
    fn put_ipv6(&mut self, addr: &Ipv6Addr);

    /// Writes the shortest-bytes form of a prefix: `ceil(prefix_bits / 8)`
    /// bytes taken from the front of `addr_bytes`.
    fn put_prefix_bytes(&mut self, prefix_bits: u8, addr_bytes: &[u8]);
}

impl BytesMutExt for BytesMut {
    fn put_u24(&mut self, n: u32) {
        let n = n.to_be_bytes();
        self.put_slice(&n[1..=3]);
    }

    fn put_ip(&mut self, addr: &IpAddr) {
        match addr {
            IpAddr::V4(addr) => self.put_slice(&addr.octets()),
            IpAddr::V6(addr) => self.put_slice(&addr.octets()),
        }
    }

    fn put_ipv4(&mut self, addr: &Ipv4Addr) {
        self.put_u32((*addr).into())
    }

    fn put_ipv6(&mut self, addr: &Ipv6Addr) {
        self.put_slice(&addr.octets())
    }

    fn put_prefix_bytes(&mut self, prefix_bits: u8, addr_bytes: &[u8]) {
        let nbytes = prefix_bits.div_ceil(8) as usize;
        self.put_slice(&addr_bytes[..nbytes]);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn u24_roundtrip() {
        let mut buf = BytesMut::new();
        buf.put_u24(0x00ab_cdef & 0x00ff_ffff);
        let mut b = buf.freeze();
        assert_eq!(b.try_get_u24().unwrap(), 0x00ab_cdef & 0x00ff_ffff);
    }

    #[test]
    fn prefix_bytes_short_read_zero_pads() {
        let mut b = Bytes::from_static(&[10, 0]);
        let out = b.try_get_prefix_bytes(16, 32).unwrap();
        assert_eq!(&out[..], &[10, 0, 0, 0]);
    }

    #[test]
    fn prefix_bytes_rejects_length_over_address_width() {
        let mut b = Bytes::from_static(&[10, 0, 0, 0, 0]);
        assert!(b.try_get_prefix_bytes(40, 32).is_err());
    }
}
