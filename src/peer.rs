//
// Per-neighbor session (spec.md §3/§4.G): owns the FSM state, at most one
// live `Connection`, the negotiated session once established, both adj-
// RIBs, and this peer's timers. Grounded in holo-bgp's `Neighbor`
// (neighbor.rs) and its `events.rs` `process_*` dispatch, restructured so
// the connection never reaches back into the peer (spec.md §3: "a
// connection doesn't know about the peer that owns it") — every inbound
// byte surfaces here as an `RxEvent` over a channel instead of a direct
// method call.
//

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::config::NeighborConfig;
use crate::connection::{self, Connection, RxEvent, TransportConfig};
use crate::debug::Debug as DebugEvent;
use crate::error::PeerRxError;
use crate::fsm::{self, Event as FsmEvent, State, Timer};
use crate::negotiate::{self, Negotiated, ValidationError};
use crate::packet::attribute::PackCache;
use crate::packet::capability::{AddPathMode, AddPathTuple, Capability, GracefulRestart};
use crate::packet::consts::{Afi, Safi};
use crate::packet::error::{fsm_error, Notifiable};
use crate::packet::message::{
    DecodeCxt, EncodeCxt, KeepaliveMsg, Message, NotificationMsg, OpenMsg,
};
use crate::packet::nlri::Family;
use crate::rib::{AdjRibIn, AdjRibOut};

/// Outcome of driving a peer forward one step, handed back to the reactor
/// so it can render JSON/text events (events.rs) and update its own
/// bookkeeping. `peer.rs` never talks to `Processes` directly — keeping
/// the per-neighbor session decoupled from the external-process fan-out
/// (spec.md §3 component boundaries).
#[derive(Debug)]
pub enum Occurrence {
    StateChanged { old: State, new: State },
    Open(OpenMsg),
    Keepalive,
    Update(Vec<(Family, crate::packet::nlri::Nlri, crate::rib::Change)>),
    Refresh(crate::packet::message::RouteRefreshMsg),
    Operational(crate::packet::message::OperationalMsg),
    NotificationSent(NotificationMsg),
    NotificationReceived(NotificationMsg),
    ConnectionClosed,
}

/// Signals a peer's own timers raise back into the reactor's select loop.
#[derive(Clone, Copy, Debug)]
enum Signal {
    Timer(Timer),
}

/// Simple token-bucket limiting outbound UPDATE message rate (spec.md §4.G
/// SUPPLEMENTED FEATURES, `NeighborConfig::rate_limit`). Refills
/// continuously rather than once a second, so a peer configured for 10
/// msg/s doesn't see its whole budget land in the same instant.
struct RateLimiter {
    rate_per_sec: f64,
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    fn new(rate_per_sec: u32) -> RateLimiter {
        RateLimiter { rate_per_sec: rate_per_sec as f64, tokens: rate_per_sec as f64, last: Instant::now() }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.rate_per_sec);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PeerStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub established_transitions: u64,
}

/// Which side's TCP connection survives an OPEN collision (spec.md §4.G
/// Open Question: ties resolved by BGP Identifier, RFC 4271 §6.8 — the
/// connection initiated by the speaker with the higher identifier wins).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CollisionOutcome {
    KeepExisting,
    KeepIncoming,
}

pub fn resolve_collision(
    local_identifier: Ipv4Addr,
    remote_identifier: Ipv4Addr,
    existing_is_outbound: bool,
) -> CollisionOutcome {
    let local_wins = local_identifier > remote_identifier;
    // The connection *we* initiated survives iff our identifier is higher.
    if existing_is_outbound == local_wins {
        CollisionOutcome::KeepExisting
    } else {
        CollisionOutcome::KeepIncoming
    }
}

pub struct Peer {
    pub config: NeighborConfig,
    pub local_asn: u32,
    /// The BGP instance's ASN, used whenever this neighbor's own
    /// `local_as` override is absent (spec.md §3 Peer configuration).
    instance_asn: u32,
    pub local_identifier: Ipv4Addr,
    pub transport: TransportConfig,

    pub state: State,
    connection: Option<Connection>,
    connection_is_outbound: bool,
    rx_events: Option<UnboundedReceiver<RxEvent>>,
    local_open: Option<OpenMsg>,
    remote_open: Option<OpenMsg>,
    pub negotiated: Option<Negotiated>,

    pub adj_rib_in: AdjRibIn,
    pub adj_rib_out: AdjRibOut,
    pack_cache: PackCache,

    connect_retry_attempt: u32,
    connect_retry_timer: Option<crate::util::task::TimeoutTask>,
    hold_timer: Option<crate::util::task::TimeoutTask>,
    keepalive_timer: Option<crate::util::task::IntervalTask>,
    stale_routes_timer: Option<crate::util::task::TimeoutTask>,
    signal_tx: UnboundedSender<Signal>,
    signal_rx: UnboundedReceiver<Signal>,

    rate_limiter: Option<RateLimiter>,
    pub stats: PeerStats,
}

impl Peer {
    pub fn new(config: NeighborConfig, instance_asn: u32, local_identifier: Ipv4Addr) -> Peer {
        let transport = TransportConfig {
            local_addr: None,
            ttl: None,
            ttl_security_hops: config.ttl_security_hops,
            md5_password: config.md5_password.clone(),
        };
        let rate_limiter = config.rate_limit.map(RateLimiter::new);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        // A neighbor's own `local_as` overrides the instance-wide ASN, the
        // way a confederation member-AS or route-reflector-per-neighbor
        // identity would (spec.md §3 Peer "owns configuration").
        let local_asn = config.local_as.unwrap_or(instance_asn);

        Peer {
            config,
            local_asn,
            instance_asn,
            local_identifier,
            transport,
            state: State::Idle,
            connection: None,
            connection_is_outbound: false,
            rx_events: None,
            local_open: None,
            remote_open: None,
            negotiated: None,
            adj_rib_in: AdjRibIn::new(),
            adj_rib_out: AdjRibOut::new(),
            pack_cache: PackCache::default(),
            connect_retry_attempt: 0,
            connect_retry_timer: None,
            hold_timer: None,
            keepalive_timer: None,
            stale_routes_timer: None,
            signal_tx,
            signal_rx,
            rate_limiter,
            stats: PeerStats::default(),
        }
    }

    pub fn address(&self) -> IpAddr {
        self.config.address
    }

    /// This neighbor's local offer, built once per connection attempt from
    /// its configuration (spec.md §4.E).
    fn build_local_open(&self) -> OpenMsg {
        let mut capabilities = std::collections::BTreeSet::new();
        capabilities.insert(Capability::FourOctetAsNumber { asn: self.local_asn });
        capabilities.insert(Capability::RouteRefresh);
        capabilities.insert(Capability::EnhancedRouteRefresh);

        let families = if self.config.families.is_empty() {
            vec![Family::IPV4_UNICAST]
        } else {
            self.config.families.clone()
        };
        for family in &families {
            capabilities.insert(Capability::MultiProtocol { afi: family.afi, safi: family.safi });
        }

        let mut addpath_tuples = std::collections::BTreeSet::new();
        for family in &self.config.addpath_send {
            addpath_tuples.insert(AddPathTuple { afi: family.afi, safi: family.safi, mode: AddPathMode::Send });
        }
        for family in &self.config.addpath_receive {
            let mode = if addpath_tuples.iter().any(|t| t.afi == family.afi && t.safi == family.safi) {
                AddPathMode::ReceiveSend
            } else {
                AddPathMode::Receive
            };
            addpath_tuples.retain(|t| !(t.afi == family.afi && t.safi == family.safi));
            addpath_tuples.insert(AddPathTuple { afi: family.afi, safi: family.safi, mode });
        }
        if !addpath_tuples.is_empty() {
            capabilities.insert(Capability::AddPath(addpath_tuples));
        }

        if self.config.extended_message == Some(true) {
            capabilities.insert(Capability::ExtendedMessage);
        }

        if let Some(gr) = &self.config.graceful_restart {
            capabilities.insert(Capability::GracefulRestart(GracefulRestart {
                restarting: false,
                restart_time: gr.restart_time,
                families: families.iter().map(|f| (f.afi, f.safi, true)).collect(),
            }));
        }

        let my_as = if self.local_asn > u16::MAX as u32 { crate::packet::consts::AS_TRANS } else { self.local_asn as u16 };

        OpenMsg {
            version: crate::packet::consts::BGP_VERSION,
            my_as,
            holdtime: self.config.hold_time,
            identifier: self.local_identifier,
            capabilities,
        }
    }

    /// Administratively starts this peer: Idle -> Connect, and (unless
    /// `passive`) begins actively opening a TCP connection (spec.md §4.G).
    pub async fn admin_start(&mut self) -> Vec<Occurrence> {
        if self.state != State::Idle {
            return vec![];
        }
        let mut out = self.apply_event(FsmEvent::AdminStart);
        if !self.config.passive {
            self.try_connect().await;
        } else {
            self.start_connect_retry_timer();
        }
        out.append(&mut vec![]);
        out
    }

    /// Administratively stops this peer, sending a Cease NOTIFICATION if a
    /// session is up (spec.md §4.G).
    pub fn admin_stop(&mut self) -> Vec<Occurrence> {
        self.admin_stop_with(crate::packet::consts::CeaseSubcode::AdministrativeShutdown)
    }

    /// Same as [`Peer::admin_stop`], but with a caller-chosen Cease
    /// subcode — used by a config reload that tears a peer down because
    /// its identity changed materially (spec.md §4.I: NOTIFICATION (6,6)
    /// "other configuration change").
    pub fn admin_stop_with(&mut self, subcode: crate::packet::consts::CeaseSubcode) -> Vec<Occurrence> {
        if self.state.is_established() || self.state == State::OpenConfirm {
            self.send_notification(NotificationMsg::new(
                crate::packet::consts::ErrorCode::Cease as u8,
                subcode as u8,
                vec![],
            ));
        }
        self.teardown_connection();
        self.apply_event(FsmEvent::AdminStop)
    }

    /// Applies a reload's new configuration for a neighbor whose identity
    /// (remote address + ASN) is unchanged (spec.md §4.I reload
    /// semantics). Takes effect on the next connection attempt; an
    /// already-established session keeps running under its old negotiated
    /// parameters rather than being torn down.
    pub fn reconfigure(&mut self, config: NeighborConfig) {
        self.transport.md5_password = config.md5_password.clone();
        self.transport.ttl_security_hops = config.ttl_security_hops;
        self.rate_limiter = config.rate_limit.map(RateLimiter::new);
        self.local_asn = config.local_as.unwrap_or(self.instance_asn);
        self.config = config;
    }

    async fn try_connect(&mut self) {
        if self.connection.is_some() {
            return;
        }
        match connection::connect(self.config.address, &self.transport).await {
            Ok(stream) => self.adopt_connection(stream, true),
            Err(error) => {
                error.log_debug_pub();
                self.connect_retry_attempt += 1;
                self.start_connect_retry_timer();
                let _ = self.apply_event(FsmEvent::TcpConnectionFails);
            }
        }
    }

    /// Called by the reactor when a listener accepts a connection whose
    /// peer address matches this neighbor (spec.md §4.F). Applies RFC
    /// 4271 collision resolution if a connection is already in progress.
    pub fn accept(&mut self, stream: TcpStream) -> Vec<Occurrence> {
        if let Err(error) = connection::configure_accepted(&stream, &self.transport) {
            error.log_debug_pub();
            return vec![];
        }
        DebugEvent::ConnectionAccepted.log(Some(self.address()));

        if self.connection.is_some() {
            match resolve_collision(self.local_identifier, self.negotiated_or_unspecified_remote_id(), self.connection_is_outbound) {
                CollisionOutcome::KeepExisting => return vec![],
                CollisionOutcome::KeepIncoming => self.teardown_connection(),
            }
        }
        self.adopt_connection(stream, false);
        self.apply_event(FsmEvent::TcpConnectionConfirmed)
    }

    fn negotiated_or_unspecified_remote_id(&self) -> Ipv4Addr {
        self.remote_open.as_ref().map(|o| o.identifier).unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    fn adopt_connection(&mut self, stream: TcpStream, outbound: bool) {
        let (tx, rx) = mpsc::unbounded_channel();
        let decode_cxt = DecodeCxt::default();
        let encode_cxt = EncodeCxt::default();
        self.connection = Some(Connection::spawn(stream, decode_cxt, encode_cxt, tx));
        self.rx_events = Some(rx);
        self.connection_is_outbound = outbound;
        self.connect_retry_attempt = 0;

        let open = self.build_local_open();
        self.send_message(Message::Open(open.clone()));
        self.local_open = Some(open);
        self.start_open_sent_hold_timer();
    }

    fn teardown_connection(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
        self.rx_events = None;
        self.remote_open = None;
        self.negotiated = None;
        self.hold_timer = None;
        self.keepalive_timer = None;
    }

    /// Waits for the next thing this peer needs the reactor to react to:
    /// a message/close from its connection, or one of its own timers
    /// firing. Pending forever if neither exists yet (Idle/Active with no
    /// connection and no running timer).
    pub async fn recv(&mut self) -> PeerWake {
        tokio::select! {
            biased;
            Some(signal) = recv_signal(&mut self.signal_rx) => PeerWake::Signal(signal_timer(signal)),
            Some(event) = recv_rx(&mut self.rx_events) => PeerWake::Rx(event),
            else => std::future::pending().await,
        }
    }

    /// Applies one inbound `RxEvent` from this peer's connection (spec.md
    /// §4.D/§4.G), returning everything the reactor should render as an
    /// external-process event.
    pub fn handle_rx(&mut self, event: RxEvent) -> Vec<Occurrence> {
        match event {
            RxEvent::Closed => {
                self.teardown_connection();
                let mut out = self.apply_event(FsmEvent::TcpConnectionClosed);
                out.push(Occurrence::ConnectionClosed);
                out
            }
            RxEvent::DecodeError(decode_error) => {
                let notif = decode_error.notification();
                self.send_notification(notif.clone());
                self.teardown_connection();
                let mut out = self.apply_event(FsmEvent::BgpHeaderErr);
                out.push(Occurrence::NotificationSent(notif));
                out
            }
            RxEvent::Message(msg) => self.handle_message(msg),
        }
    }

    fn handle_message(&mut self, msg: Message) -> Vec<Occurrence> {
        self.stats.messages_received += 1;
        self.reset_hold_timer();

        match (self.state, msg) {
            (State::OpenSent, Message::Open(open)) => self.handle_open(open),
            (_, Message::Open(_)) if self.state != State::OpenSent => {
                self.reject(fsm_error(crate::packet::consts::FsmErrorSubcode::UnexpectedMessageInOpenSent))
            }
            (State::OpenConfirm, Message::Keepalive(_)) => {
                let mut out = self.apply_event(FsmEvent::KeepaliveReceived);
                self.stats.established_transitions += 1;
                self.start_keepalive_timer();
                out.push(Occurrence::Keepalive);
                out
            }
            (State::Established, Message::Keepalive(_)) => vec![Occurrence::Keepalive],
            (State::Established, Message::Update(update)) => self.handle_update(update),
            (State::Established, Message::RouteRefresh(refresh)) => {
                vec![Occurrence::Refresh(refresh)]
            }
            (State::Established, Message::Operational(op)) => vec![Occurrence::Operational(op)],
            (_, Message::Notification(notif)) => {
                self.teardown_connection();
                let mut out = self.apply_event(FsmEvent::NotificationReceived);
                out.push(Occurrence::NotificationReceived(notif));
                out
            }
            (_, Message::Nop) => vec![],
            (state, _) => {
                let subcode = match state {
                    State::OpenConfirm => crate::packet::consts::FsmErrorSubcode::UnexpectedMessageInOpenConfirm,
                    State::Established => crate::packet::consts::FsmErrorSubcode::UnexpectedMessageInEstablished,
                    _ => crate::packet::consts::FsmErrorSubcode::UnexpectedMessageInOpenSent,
                };
                self.reject(fsm_error(subcode))
            }
        }
    }

    fn reject(&mut self, notif: NotificationMsg) -> Vec<Occurrence> {
        self.send_notification(notif.clone());
        self.teardown_connection();
        let mut out = self.apply_event(FsmEvent::BgpHeaderErr);
        out.push(Occurrence::NotificationSent(notif));
        out
    }

    fn handle_open(&mut self, open: OpenMsg) -> Vec<Occurrence> {
        if let Err(validation_error) = negotiate::validate(&open, self.config.remote_as, self.local_identifier) {
            let notif = NotificationMsg::new(
                crate::packet::consts::ErrorCode::OpenMessageError as u8,
                crate::packet::consts::OpenMessageErrorSubcode::from(validation_error) as u8,
                vec![],
            );
            return self.reject(notif);
        }

        let local = self.local_open.clone().unwrap_or_else(|| self.build_local_open());
        let negotiated = negotiate::negotiate(&local, &open);
        self.remote_open = Some(open.clone());

        if let Some(gr) = &negotiated.graceful_restart {
            if gr.restarting {
                for (afi, safi, _) in &gr.families {
                    self.adj_rib_in.mark_family_stale(Family::new(*afi, *safi));
                }
            }
        }

        self.negotiated = Some(negotiated.clone());
        if let Some(conn) = &self.connection {
            conn.update_encode_cxt(negotiated.encode_cxt());
            conn.update_decode_cxt(negotiated.decode_cxt());
        }
        self.send_message(Message::Keepalive(KeepaliveMsg));
        self.start_hold_timer(negotiated.holdtime);

        let mut out = self.apply_event(FsmEvent::BgpOpenValid);
        out.push(Occurrence::Open(open));
        out
    }

    fn handle_update(&mut self, update: crate::packet::message::UpdateMsg) -> Vec<Occurrence> {
        let mut changes = vec![];

        for nlri in &update.withdrawn {
            let key = nlri.key();
            if let Some(_entry) = self.adj_rib_in.withdraw(&key) {
                changes.push((key.family, nlri.clone(), crate::rib::Change::Withdraw));
            }
        }
        for nlri in &update.reachable {
            let key = nlri.key();
            self.adj_rib_in.update(key.clone(), update.attrs.clone());
            changes.push((key.family, nlri.clone(), crate::rib::Change::Announce(update.attrs.clone())));
        }
        if let Some(mp_unreach) = &update.attrs.mp_unreach {
            for nlri in &mp_unreach.nlri {
                let key = nlri.key();
                if let Some(_entry) = self.adj_rib_in.withdraw(&key) {
                    changes.push((key.family, nlri.clone(), crate::rib::Change::Withdraw));
                }
            }
        }
        if let Some(mp_reach) = &update.attrs.mp_reach {
            for nlri in &mp_reach.nlri {
                let key = nlri.key();
                self.adj_rib_in.update(key.clone(), update.attrs.clone());
                changes.push((key.family, nlri.clone(), crate::rib::Change::Announce(update.attrs.clone())));
            }
        }

        if let Some(family) = update.end_of_rib_family() {
            let cleared = self.adj_rib_in.clear_stale(family);
            for key in cleared {
                changes.push((
                    family,
                    crate::packet::nlri::Nlri { family, action: crate::packet::nlri::Action::Withdraw, path_id: key.path_id, data: key.data.clone() },
                    crate::rib::Change::Withdraw,
                ));
            }
        }

        vec![Occurrence::Update(changes)]
    }

    /// Applies a pure FSM transition, logging it and performing the side
    /// effects that belong to the `state -> next` edge itself (timer
    /// starts/stops), not to the message that triggered it.
    fn apply_event(&mut self, event: FsmEvent) -> Vec<Occurrence> {
        match fsm::next_state(self.state, &event) {
            Some(next) => {
                DebugEvent::FsmTransition { old_state: self.state, new_state: next, event: &event }
                    .log(Some(self.address()));
                let old = self.state;
                self.state = next;
                if next == State::Idle {
                    self.hold_timer = None;
                    self.keepalive_timer = None;
                    self.stale_routes_timer = None;
                    if !self.config.passive {
                        self.start_connect_retry_timer();
                    }
                }
                vec![Occurrence::StateChanged { old, new: next }]
            }
            None => {
                DebugEvent::FsmEventIgnored { state: self.state, event: &event }.log(Some(self.address()));
                vec![]
            }
        }
    }

    fn send_message(&mut self, msg: Message) {
        if let Some(conn) = &self.connection {
            DebugEvent::MessageTx(&msg).log(Some(self.address()));
            conn.send(msg);
            self.stats.messages_sent += 1;
        }
    }

    fn send_notification(&mut self, notif: NotificationMsg) {
        self.send_message(Message::Notification(notif));
        let _ = self.apply_event(FsmEvent::NotificationSent);
    }

    /// Drains one UPDATE's worth of pending outbound changes, if the rate
    /// limiter (spec.md §4.G SUPPLEMENTED FEATURES) allows it right now.
    pub fn drain_outbound(&mut self) -> bool {
        if !self.state.is_established() {
            return false;
        }
        if let Some(limiter) = &mut self.rate_limiter {
            if !limiter.try_take() {
                return false;
            }
        }
        let Some(negotiated) = &self.negotiated else { return false };
        let addpath = negotiated.addpath_send.contains(&Family::IPV4_UNICAST);
        let budget = negotiated.encode_cxt().max_body_len() as usize;
        let Some(update) = self.adj_rib_out.drain(addpath, budget.saturating_sub(64)) else { return false };
        let _ = self.pack_cache.pack(&update.attrs, negotiated.four_byte_asn);
        self.send_message(Message::Update(update));
        true
    }

    fn start_connect_retry_timer(&mut self) {
        let backoff = fsm::backoff(self.connect_retry_attempt, Duration::from_secs(self.config.connect_retry_time as u64));
        let tx = self.signal_tx.clone();
        self.connect_retry_timer =
            Some(crate::util::task::TimeoutTask::new(backoff, move || {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(Signal::Timer(Timer::ConnectRetry));
                }
            }));
    }

    fn start_open_sent_hold_timer(&mut self) {
        let tx = self.signal_tx.clone();
        self.hold_timer = Some(crate::util::task::TimeoutTask::new(fsm::OPEN_SENT_HOLD_TIME, move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Signal::Timer(Timer::Hold));
            }
        }));
    }

    fn start_hold_timer(&mut self, holdtime: u16) {
        if holdtime == 0 {
            self.hold_timer = None;
            return;
        }
        let tx = self.signal_tx.clone();
        self.hold_timer = Some(crate::util::task::TimeoutTask::new(Duration::from_secs(holdtime as u64), move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Signal::Timer(Timer::Hold));
            }
        }));
    }

    fn reset_hold_timer(&mut self) {
        if let Some(timer) = &mut self.hold_timer {
            timer.reset(None);
        }
    }

    fn start_keepalive_timer(&mut self) {
        let Some(negotiated) = &self.negotiated else { return };
        if negotiated.keepalive == 0 {
            return;
        }
        let interval = Duration::from_secs(negotiated.keepalive as u64);
        let tx = self.signal_tx.clone();
        self.keepalive_timer = Some(crate::util::task::IntervalTask::new(interval, move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Signal::Timer(Timer::Keepalive));
            }
        }));
    }

    /// Applies a timer firing (spec.md §4.G). `StaleRoutes` is the
    /// graceful-restart sweep timer; `ConnectRetry` re-attempts outbound
    /// connect for non-passive neighbors; `Hold` tears the session down
    /// with a Hold Timer Expired NOTIFICATION; `Keepalive` sends one and
    /// restarts itself.
    pub async fn handle_timer(&mut self, timer: Timer) -> Vec<Occurrence> {
        match timer {
            Timer::ConnectRetry => {
                if self.state == State::Connect || self.state == State::Active {
                    let mut out = self.apply_event(FsmEvent::ConnectRetryExpires);
                    if !self.config.passive {
                        self.try_connect().await;
                    }
                    out
                } else {
                    vec![]
                }
            }
            Timer::Hold => {
                let notif = NotificationMsg::new(
                    crate::packet::consts::ErrorCode::HoldTimerExpired as u8,
                    0,
                    vec![],
                );
                self.send_notification(notif.clone());
                self.teardown_connection();
                let mut out = self.apply_event(FsmEvent::HoldTimerExpires);
                out.push(Occurrence::NotificationSent(notif));
                out
            }
            Timer::Keepalive => {
                self.send_message(Message::Keepalive(KeepaliveMsg));
                vec![]
            }
            Timer::StaleRoutes => vec![],
        }
    }
}

async fn recv_signal(rx: &mut UnboundedReceiver<Signal>) -> Option<Signal> {
    rx.recv().await
}

async fn recv_rx(rx: &mut Option<UnboundedReceiver<RxEvent>>) -> Option<RxEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn signal_timer(signal: Signal) -> Timer {
    let Signal::Timer(t) = signal;
    t
}

/// What woke a peer up: either a connection event, or one of its timers.
pub enum PeerWake {
    Rx(RxEvent),
    Signal(Timer),
}

impl crate::error::IoError {
    /// Crate-visible alias used by `peer.rs` and `reactor.rs`, which don't
    /// have access to the private `log_debug` defined alongside
    /// `connection.rs`'s read/write loops.
    pub(crate) fn log_debug_pub(&self) {
        tracing::debug!(error = %self, "connection attempt failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_keeps_higher_identifier_initiator() {
        let local: Ipv4Addr = "192.0.2.2".parse().unwrap();
        let remote: Ipv4Addr = "192.0.2.1".parse().unwrap();
        // Local identifier is higher, and local initiated (outbound).
        assert_eq!(
            resolve_collision(local, remote, true),
            CollisionOutcome::KeepExisting
        );
        // Local identifier is higher, but the existing connection is the
        // one the peer initiated (inbound) -- it must lose to a fresh
        // outbound attempt from the higher side, i.e. keep the incoming.
        assert_eq!(
            resolve_collision(local, remote, false),
            CollisionOutcome::KeepIncoming
        );
    }

    #[test]
    fn collision_keeps_lower_identifier_peers_incoming() {
        let local: Ipv4Addr = "192.0.2.1".parse().unwrap();
        let remote: Ipv4Addr = "192.0.2.2".parse().unwrap();
        assert_eq!(
            resolve_collision(local, remote, true),
            CollisionOutcome::KeepIncoming
        );
    }

    #[test]
    fn rate_limiter_refills_over_time() {
        let mut limiter = RateLimiter::new(1);
        assert!(limiter.try_take());
        assert!(!limiter.try_take());
    }

    fn test_neighbor(local_as: Option<u32>) -> NeighborConfig {
        NeighborConfig {
            address: "192.0.2.2".parse().unwrap(),
            remote_as: 65002,
            local_as,
            hold_time: 180,
            connect_retry_time: 120,
            passive: true,
            md5_password: None,
            ttl_security_hops: None,
            families: vec![],
            addpath_send: vec![],
            addpath_receive: vec![],
            extended_message: None,
            rate_limit: None,
            graceful_restart: None,
        }
    }

    #[test]
    fn local_as_override_takes_precedence_over_instance_asn() {
        let peer = Peer::new(test_neighbor(Some(65099)), 65001, "192.0.2.1".parse().unwrap());
        assert_eq!(peer.local_asn, 65099);
    }

    #[test]
    fn local_as_absent_falls_back_to_instance_asn() {
        let peer = Peer::new(test_neighbor(None), 65001, "192.0.2.1".parse().unwrap());
        assert_eq!(peer.local_asn, 65001);
    }

    #[test]
    fn reconfigure_recomputes_local_asn_when_override_removed() {
        let mut peer = Peer::new(test_neighbor(Some(65099)), 65001, "192.0.2.1".parse().unwrap());
        assert_eq!(peer.local_asn, 65099);
        peer.reconfigure(test_neighbor(None));
        assert_eq!(peer.local_asn, 65001);
    }
}
