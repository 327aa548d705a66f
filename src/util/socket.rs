//
// Socket-level extension traits: TCP-MD5, GTSM/TTL, and connection info.
// Adapted from holo_utils::socket, trimmed to what a BGP speaker's
// `Connection` (§4.F) actually needs — no netlink/multicast/vif plumbing.
//

use std::net::{IpAddr, SocketAddr};
use std::os::raw::c_int;
use std::os::unix::io::AsRawFd;

use nix::sys::socket::SockaddrStorage;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Address/port pair for both ends of an established TCP session. Carried
/// on `Connection` and surfaced in neighbor state dumps.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct TcpConnInfo {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
}

// FFI struct for the TCP_MD5SIG socket option (Linux).
#[repr(C)]
#[derive(Copy, Clone)]
struct TcpMd5Sig {
    addr: SockaddrStorage,
    flags: u8,
    prefixlen: u8,
    keylen: u16,
    __pad: u32,
    key: [u8; 108],
}

type Result<T> = std::io::Result<T>;

fn setsockopt<F: AsRawFd>(
    fd: &F,
    level: c_int,
    name: c_int,
    value: *const libc::c_void,
    len: libc::socklen_t,
) -> Result<()> {
    let rc = unsafe { libc::setsockopt(fd.as_raw_fd(), level, name, value, len) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Extension methods shared by `TcpSocket`, `TcpListener` and `TcpStream`.
pub trait TcpSocketExt: AsRawFd + Sized {
    /// Sets or clears the TCP-MD5 signature option for sessions to `dst`
    /// (§4.F). Passing `password: None` clears a previously installed key.
    fn set_md5sig(&self, dst: &IpAddr, password: Option<&str>) -> Result<()> {
        let dst = SocketAddr::from((*dst, 0));
        let mut optval = TcpMd5Sig {
            addr: dst.into(),
            flags: 0,
            prefixlen: 0,
            keylen: 0,
            __pad: 0,
            key: [0; 108],
        };
        if let Some(password) = password {
            optval.keylen = password.len() as u16;
            optval.key[..password.len()].copy_from_slice(password.as_bytes());
        }
        setsockopt(
            self,
            libc::IPPROTO_TCP,
            libc::TCP_MD5SIG,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<TcpMd5Sig>() as libc::socklen_t,
        )
    }

    /// Sets the outgoing IP TTL / IPv6 hop limit.
    fn set_ttl_value(&self, ttl: u8) -> Result<()> {
        let optval = ttl as c_int;
        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_TTL,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<c_int>() as libc::socklen_t,
        )
    }

    /// Sets the minimum acceptable TTL on inbound packets (GTSM, RFC 5082).
    fn set_minttl(&self, ttl: u8) -> Result<()> {
        let optval = ttl as c_int;
        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_MINTTL,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<c_int>() as libc::socklen_t,
        )
    }
}

impl TcpSocketExt for TcpSocket {}
impl TcpSocketExt for TcpListener {}
impl TcpSocketExt for TcpStream {}

/// Extension methods for an established `TcpStream`.
pub trait TcpStreamExt {
    fn conn_info(&self) -> Result<TcpConnInfo>;
}

impl TcpStreamExt for TcpStream {
    fn conn_info(&self) -> Result<TcpConnInfo> {
        let local_addr = self.local_addr()?;
        let remote_addr = self.peer_addr()?;
        Ok(TcpConnInfo {
            local_addr: local_addr.ip(),
            local_port: local_addr.port(),
            remote_addr: remote_addr.ip(),
            remote_port: remote_addr.port(),
        })
    }
}

/// Binds a `TcpSocket` with `SO_REUSEADDR` set, for the listener and for
/// outbound connects that must use a specific local address/port.
pub fn bind_reuseaddr(addr: SocketAddr) -> Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket)
}
