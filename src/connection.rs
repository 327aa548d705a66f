//
// Non-blocking TCP connection handling (spec.md §4.F). Grounded in
// holo-bgp's network.rs (`connect`, `nbr_read_loop`, `nbr_write_loop`)
// and tasks.rs (`nbr_rx`, `nbr_tx`): a connection is split into owned
// read/write halves, each driven by its own cooperative task that talks
// to the peer engine over a channel, rather than the teacher's direct
// `holo_utils::ip::AddressFamily` dispatch — this crate has no IPv6/IPv4
// parallel socket-option tables to share, so TTL/MD5/GTSM setup below
// goes straight through `util::socket`.
//

use std::net::{IpAddr, SocketAddr};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::debug_span;

use crate::error::IoError;
use crate::packet::consts::{BGP_PORT, HEADER_LEN};
use crate::packet::message::{DecodeCxt, EncodeCxt, Message};
use crate::util::socket::{bind_reuseaddr, TcpSocketExt, TcpStreamExt};
use crate::util::task::Task;

const READ_BUF_SIZE: usize = 65535;

/// Per-connection transport parameters a neighbor's configuration
/// resolves to before the TCP handshake (spec.md §4.F).
#[derive(Clone, Debug, Default)]
pub struct TransportConfig {
    pub local_addr: Option<IpAddr>,
    pub ttl: Option<u8>,
    pub ttl_security_hops: Option<u8>,
    pub md5_password: Option<String>,
}

/// Opens a listening socket for the given local address, with GTSM's
/// outgoing TTL set to its maximum per RFC 5082.
pub fn listen(addr: SocketAddr) -> Result<TcpListener, IoError> {
    let socket = bind_reuseaddr(addr).map_err(IoError::TcpBindError)?;
    socket.set_ttl_value(255).map_err(IoError::TcpSocketError)?;
    socket.listen(4096).map_err(IoError::TcpBindError)
}

/// Actively opens a session to `remote_addr` (spec.md §4.F: skipped
/// entirely for passive neighbors).
pub async fn connect(
    remote_addr: IpAddr,
    transport: &TransportConfig,
) -> Result<TcpStream, IoError> {
    let socket = if remote_addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4()
    } else {
        tokio::net::TcpSocket::new_v6()
    }
    .map_err(IoError::TcpSocketError)?;

    if let Some(local_addr) = transport.local_addr {
        socket.set_reuseaddr(true).map_err(IoError::TcpSocketError)?;
        socket
            .bind(SocketAddr::from((local_addr, 0)))
            .map_err(IoError::TcpBindError)?;
    }
    if let Some(ttl) = transport.ttl {
        socket.set_ttl_value(ttl).map_err(IoError::TcpSocketError)?;
    }
    if let Some(hops) = transport.ttl_security_hops {
        let min_ttl = 255u8.saturating_sub(hops).saturating_add(1);
        socket.set_minttl(min_ttl).map_err(IoError::TcpSocketError)?;
    }
    if let Some(password) = &transport.md5_password {
        socket
            .set_md5sig(&remote_addr, Some(password))
            .map_err(IoError::TcpAuthError)?;
    }

    socket
        .connect(SocketAddr::from((remote_addr, BGP_PORT)))
        .await
        .map_err(IoError::TcpConnectError)
}

/// Applies TTL/GTSM/MD5 to a just-accepted inbound socket (spec.md
/// §4.F). MD5 has to be set on the listening socket ahead of the SYN,
/// per Linux's TCP_MD5SIG semantics, so it isn't repeated here.
pub fn configure_accepted(stream: &TcpStream, transport: &TransportConfig) -> Result<(), IoError> {
    if let Some(ttl) = transport.ttl {
        stream.set_ttl_value(ttl).map_err(IoError::TcpSocketError)?;
    }
    if let Some(hops) = transport.ttl_security_hops {
        let min_ttl = 255u8.saturating_sub(hops).saturating_add(1);
        stream.set_minttl(min_ttl).map_err(IoError::TcpSocketError)?;
    }
    Ok(())
}

/// One inbound message, or the notice that the connection closed.
#[derive(Debug)]
pub enum RxEvent {
    Message(Message),
    DecodeError(crate::packet::error::DecodeError),
    Closed,
}

/// Outbound work handed to the write-side task.
#[derive(Debug)]
pub enum TxCommand {
    Send(Message),
    UpdateEncodeCxt(EncodeCxt),
}

/// A running TCP session, split into independently-scheduled read and
/// write tasks (spec.md §4.F), matching holo-bgp's `nbr_rx`/`nbr_tx`
/// pair. `peer.rs` owns the two channel endpoints and the two `Task`
/// handles; dropping either task handle tears down that side of the
/// connection.
pub struct Connection {
    pub rx_task: Task<()>,
    pub tx_task: Task<()>,
    pub tx: UnboundedSender<TxCommand>,
    decode_cxt_tx: UnboundedSender<DecodeCxt>,
}

impl Connection {
    pub fn spawn(
        stream: TcpStream,
        decode_cxt: DecodeCxt,
        encode_cxt: EncodeCxt,
        rx: UnboundedSender<RxEvent>,
    ) -> Connection {
        let (read_half, write_half) = stream.into_split();
        let (tx, tx_rx) = tokio::sync::mpsc::unbounded_channel();
        let (decode_cxt_tx, decode_cxt_rx) = tokio::sync::mpsc::unbounded_channel();

        let rx_task = Task::spawn(read_loop(read_half, decode_cxt, decode_cxt_rx, rx));
        let tx_task = Task::spawn(write_loop(write_half, encode_cxt, tx_rx));

        Connection { rx_task, tx_task, tx, decode_cxt_tx }
    }

    pub fn send(&self, msg: Message) {
        let _ = self.tx.send(TxCommand::Send(msg));
    }

    pub fn update_encode_cxt(&self, cxt: EncodeCxt) {
        let _ = self.tx.send(TxCommand::UpdateEncodeCxt(cxt));
    }

    /// Applies the negotiated add-path/extended-message context to the
    /// read side (spec.md §4.E feeds both directions once OPEN exchange
    /// completes). Mirrors `update_encode_cxt`'s channel-handoff shape but
    /// needs its own channel since the read task is parked in
    /// `stream.read`, not in a `select!` over a command queue already.
    pub fn update_decode_cxt(&self, cxt: DecodeCxt) {
        let _ = self.decode_cxt_tx.send(cxt);
    }

    /// Tears this connection down (spec.md §4.F `close()`: idempotent,
    /// called on every FSM path that leaves ESTABLISHED). The write side
    /// is detached rather than aborted: dropping `self.tx` below is what
    /// ends `write_loop` (its `rx.recv()` returns `None` only once every
    /// message already queued — including a NOTIFICATION queued moments
    /// before teardown — has been written), and a detached task keeps
    /// running to that point instead of being cut off mid-flush (spec.md
    /// §4.D: "Sending a NOTIFICATION MUST close the connection
    /// immediately after flush"). The read side has nothing left to
    /// finish, so it's fine to abort outright.
    pub fn close(mut self) {
        self.tx_task.detach();
    }
}

async fn read_loop(
    mut stream: OwnedReadHalf,
    mut cxt: DecodeCxt,
    mut cxt_rx: UnboundedReceiver<DecodeCxt>,
    rx: UnboundedSender<RxEvent>,
) {
    let span = debug_span!("connection", side = "rx");
    let _enter = span.enter();

    let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);
    let mut read_buf = [0u8; READ_BUF_SIZE];
    loop {
        tokio::select! {
            biased;
            new_cxt = cxt_rx.recv() => {
                match new_cxt {
                    Some(new_cxt) => cxt = new_cxt,
                    None => {}
                }
                continue;
            }
            result = stream.read(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        let _ = rx.send(RxEvent::Closed);
                        return;
                    }
                    Ok(n) => buf.extend_from_slice(&read_buf[..n]),
                    Err(error) => {
                        IoError::TcpReadError(error).log_debug();
                        continue;
                    }
                }
            }
        }

        loop {
            if buf.len() < HEADER_LEN as usize {
                break;
            }
            let total_len = match Message::peek_len(&buf[..HEADER_LEN as usize]) {
                Ok(len) => len as usize,
                Err(e) => {
                    let _ = rx.send(RxEvent::DecodeError(e.into()));
                    return;
                }
            };
            if buf.len() < total_len {
                break;
            }
            let mut frame = buf.split_to(total_len).freeze();
            match Message::decode(&mut frame, &cxt) {
                Ok(msg) => {
                    let _ = rx.send(RxEvent::Message(msg));
                }
                Err(e) => {
                    let _ = rx.send(RxEvent::DecodeError(e));
                }
            }
        }
    }
}

async fn write_loop(
    mut stream: OwnedWriteHalf,
    mut cxt: EncodeCxt,
    mut rx: UnboundedReceiver<TxCommand>,
) {
    let span = debug_span!("connection", side = "tx");
    let _enter = span.enter();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            TxCommand::Send(msg) => {
                let buf = msg.encode(&cxt);
                if buf.is_empty() {
                    continue;
                }
                if let Err(error) = stream.write_all(&buf).await {
                    IoError::TcpSendError(error).log_debug();
                }
            }
            TxCommand::UpdateEncodeCxt(new_cxt) => cxt = new_cxt,
        }
    }
}

pub fn conn_info(stream: &TcpStream) -> Result<crate::util::socket::TcpConnInfo, IoError> {
    stream.conn_info().map_err(IoError::TcpInfoError)
}

impl IoError {
    /// Logs at debug level without constructing a full `Error`; used on
    /// the hot read/write path where a transient I/O hiccup shouldn't be
    /// treated as fatal to the connection.
    fn log_debug(&self) {
        tracing::debug!(error = %self, "transient I/O error");
    }
}
