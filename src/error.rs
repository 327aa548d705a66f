//
// Top-level error types. Grounded in holo-bgp's error.rs: manual
// `std::error::Error` impls with a `source()` chain and a `.log()` method
// that routes each variant to the right `tracing` macro, rather than
// pulling in anyhow/thiserror for what is ultimately a short, closed list
// of failure kinds (spec.md §7).
//

use std::net::IpAddr;

use tracing::{error, warn};

use crate::config::ConfigError;
use crate::packet::error::DecodeError;

/// Top-level error, covering everything that can surface out of the
/// reactor's main loop (spec.md §7).
#[derive(Debug)]
pub enum Error {
    Io(IoError),
    Config(ConfigError),
    /// A peer session failed; carries the peer's address so the reactor
    /// can find the right `Peer` to tear down.
    PeerRx(IpAddr, PeerRxError),
    External(ExternalError),
}

#[derive(Debug)]
pub enum IoError {
    TcpSocketError(std::io::Error),
    TcpBindError(std::io::Error),
    TcpAcceptError(std::io::Error),
    TcpConnectError(std::io::Error),
    TcpReadError(std::io::Error),
    TcpSendError(std::io::Error),
    TcpAuthError(std::io::Error),
    TcpInfoError(std::io::Error),
}

/// Failures decoding or handling traffic received from an established or
/// negotiating peer (spec.md §7 kinds 1/2/3).
#[derive(Debug)]
pub enum PeerRxError {
    Decode(DecodeError),
    /// The peer's OPEN didn't match its configured ASN or collided with
    /// our own identifier (spec.md §4.E).
    Negotiation(crate::negotiate::ValidationError),
    HoldTimerExpired,
    ConnectionClosed,
}

/// Failures talking to an external-process child (spec.md §4.I).
#[derive(Debug)]
pub enum ExternalError {
    Spawn(std::io::Error),
    Read(std::io::Error),
    Write(std::io::Error),
    /// The child's pending write queue stayed above `LOW_WATER` past its
    /// backpressure timeout.
    WriteStalled,
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Error {
        Error::Io(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Error {
        Error::Config(e)
    }
}

impl From<ExternalError> for Error {
    fn from(e: ExternalError) -> Error {
        Error::External(e)
    }
}

impl Error {
    pub fn log(&self) {
        match self {
            Error::Io(error) => {
                error!(%error, "I/O error");
            }
            Error::Config(error) => {
                error!(%error, "configuration error");
            }
            Error::PeerRx(addr, error) => {
                error!(neighbor = %addr, %error, "error processing peer message");
            }
            Error::External(error) => {
                warn!(%error, "external-process error");
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Config(e) => write!(f, "configuration error: {e}"),
            Error::PeerRx(addr, e) => write!(f, "error processing message from {addr}: {e}"),
            Error::External(e) => write!(f, "external-process error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Config(e) => Some(e),
            Error::PeerRx(_, e) => Some(e),
            Error::External(e) => Some(e),
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::TcpSocketError(e) => write!(f, "failed to create TCP socket: {e}"),
            IoError::TcpBindError(e) => write!(f, "failed to bind TCP socket: {e}"),
            IoError::TcpAcceptError(e) => write!(f, "failed to accept TCP connection: {e}"),
            IoError::TcpConnectError(e) => write!(f, "failed to connect: {e}"),
            IoError::TcpReadError(e) => write!(f, "failed to read from TCP connection: {e}"),
            IoError::TcpSendError(e) => write!(f, "failed to send on TCP connection: {e}"),
            IoError::TcpAuthError(e) => write!(f, "failed to set TCP-MD5 signature option: {e}"),
            IoError::TcpInfoError(e) => write!(f, "failed to query TCP connection info: {e}"),
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::TcpSocketError(e)
            | IoError::TcpBindError(e)
            | IoError::TcpAcceptError(e)
            | IoError::TcpConnectError(e)
            | IoError::TcpReadError(e)
            | IoError::TcpSendError(e)
            | IoError::TcpAuthError(e)
            | IoError::TcpInfoError(e) => Some(e),
        }
    }
}

impl std::fmt::Display for PeerRxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerRxError::Decode(e) => write!(f, "decode error: {e}"),
            PeerRxError::Negotiation(e) => write!(f, "negotiation error: {e:?}"),
            PeerRxError::HoldTimerExpired => write!(f, "hold timer expired"),
            PeerRxError::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for PeerRxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PeerRxError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalError::Spawn(e) => write!(f, "failed to spawn child process: {e}"),
            ExternalError::Read(e) => write!(f, "failed to read from child process: {e}"),
            ExternalError::Write(e) => write!(f, "failed to write to child process: {e}"),
            ExternalError::WriteStalled => {
                write!(f, "child process write queue did not drain in time")
            }
        }
    }
}

impl std::error::Error for ExternalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExternalError::Spawn(e) | ExternalError::Read(e) | ExternalError::Write(e) => Some(e),
            ExternalError::WriteStalled => None,
        }
    }
}
