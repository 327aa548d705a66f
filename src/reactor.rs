//
// Single-threaded cooperative event loop (spec.md §4.I/§5). Grounded in
// holo-routing's master dispatch loop: one central task owns the
// configuration and the external-process fan-out, while each neighbor
// runs as its own `spawn_local` task reachable only through a command
// channel — the same "dispatch by message, not by direct call" shape
// holo-routing's master uses to talk to its per-protocol instance tasks,
// adapted here from protocol instances to BGP neighbors. This keeps
// message ordering strictly FIFO within one peer (spec.md §5) while
// leaving cross-peer ordering unspecified, exactly as allowed.
//

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::command::{self, Command, RouteChange};
use crate::config::{Config, ConfigError, NeighborConfig};
use crate::connection;
use crate::debug::Debug as DebugEvent;
use crate::events::{Event, EventContext};
use crate::fsm::State;
use crate::packet::consts::{CeaseSubcode, BGP_PORT};
use crate::packet::nlri::Action;
use crate::peer::{Occurrence, Peer, PeerWake};
use crate::process::{InboundLine, Processes, Reply};
use crate::rib::Change;
use crate::util::task::Task;

/// How often the reactor wakes up for bookkeeping that isn't driven by an
/// external event: reaping exited external processes, respawning the
/// ones configured for it, and checking stalled write queues (spec.md
/// §4.I backpressure timeout).
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How long a graceful shutdown waits for queued NOTIFICATIONs and
/// external-process writes to flush before the process exits (spec.md
/// §5 "shutdown-grace timeout").
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Work routed to one neighbor's task. Everything the reactor needs to
/// tell a peer to do crosses this channel, in send order, so a peer's
/// own event stream (RX messages, timers, commands) stays strictly
/// ordered even though the reactor itself never locks the peer.
enum PeerCommand {
    Accept(TcpStream),
    Announce(RouteChange, Option<oneshot::Sender<()>>),
    Withdraw(RouteChange, Option<oneshot::Sender<()>>),
    ClearAdjRibOut(Option<oneshot::Sender<usize>>),
    FlushAdjRibOut(Option<oneshot::Sender<usize>>),
    Show(oneshot::Sender<PeerSnapshot>),
    QueueStatus(oneshot::Sender<usize>),
    Reload(NeighborConfig),
    /// Torn down because a reload changed this neighbor's identity
    /// (spec.md §4.I: NOTIFICATION (6,6) "other configuration change").
    Remove(CeaseSubcode),
    /// Daemon shutting down (SIGTERM/SIGINT or the `shutdown` command).
    Shutdown,
}

/// A point-in-time view of one neighbor, handed back across a `Show`
/// command's oneshot reply (spec.md §4.I "show neighbor").
#[derive(Clone, Debug)]
struct PeerSnapshot {
    address: IpAddr,
    remote_as: u32,
    state: State,
    messages_sent: u64,
    messages_received: u64,
    adj_rib_in_len: usize,
    adj_rib_out_len: usize,
}

impl PeerSnapshot {
    fn capture(peer: &Peer) -> PeerSnapshot {
        PeerSnapshot {
            address: peer.address(),
            remote_as: peer.config.remote_as,
            state: peer.state,
            messages_sent: peer.stats.messages_sent,
            messages_received: peer.stats.messages_received,
            adj_rib_in_len: peer.adj_rib_in.len(),
            adj_rib_out_len: peer.adj_rib_out.len(),
        }
    }

    fn render(&self) -> String {
        format!(
            "neighbor {} asn {} state {:?} sent {} received {} adj-rib-in {} adj-rib-out {}",
            self.address,
            self.remote_as,
            self.state,
            self.messages_sent,
            self.messages_received,
            self.adj_rib_in_len,
            self.adj_rib_out_len,
        )
    }
}

/// Applies one command to a peer the reactor otherwise never touches
/// directly. Returns `false` when the peer's task should end.
async fn apply_peer_command(
    peer: &mut Peer,
    cmd: PeerCommand,
    events_tx: &UnboundedSender<ReactorEvent>,
) -> bool {
    let addr = peer.address();
    match cmd {
        PeerCommand::Accept(stream) => {
            for occurrence in peer.accept(stream) {
                let _ = events_tx.send(ReactorEvent::PeerOccurrence(addr, occurrence));
            }
        }
        PeerCommand::Announce(change, ack) => {
            let key = change.nlri.key();
            let rib_change = match change.nlri.action {
                Action::Announce => Change::Announce(change.attrs),
                Action::Withdraw => Change::Withdraw,
            };
            peer.adj_rib_out.add(key, rib_change);
            peer.drain_outbound();
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }
        PeerCommand::Withdraw(change, ack) => {
            let key = change.nlri.key();
            peer.adj_rib_out.add(key, Change::Withdraw);
            peer.drain_outbound();
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }
        PeerCommand::ClearAdjRibOut(ack) => {
            let n = peer.adj_rib_out.clear();
            if let Some(ack) = ack {
                let _ = ack.send(n);
            }
        }
        PeerCommand::FlushAdjRibOut(ack) => {
            let mut n = 0;
            while peer.drain_outbound() {
                n += 1;
            }
            if let Some(ack) = ack {
                let _ = ack.send(n);
            }
        }
        PeerCommand::Show(reply) => {
            let _ = reply.send(PeerSnapshot::capture(peer));
        }
        PeerCommand::QueueStatus(reply) => {
            let _ = reply.send(peer.adj_rib_out.len());
        }
        PeerCommand::Reload(config) => {
            peer.reconfigure(config);
        }
        PeerCommand::Remove(subcode) => {
            for occurrence in peer.admin_stop_with(subcode) {
                let _ = events_tx.send(ReactorEvent::PeerOccurrence(addr, occurrence));
            }
            return false;
        }
        PeerCommand::Shutdown => {
            for occurrence in peer.admin_stop() {
                let _ = events_tx.send(ReactorEvent::PeerOccurrence(addr, occurrence));
            }
            return false;
        }
    }
    true
}

/// One neighbor's entire lifetime: the FSM driven by its own connection
/// events and timers, interleaved with commands from the reactor, ending
/// only when a `Remove`/`Shutdown` command arrives or its channel closes.
async fn run_peer(
    mut peer: Peer,
    mut cmd_rx: UnboundedReceiver<PeerCommand>,
    events_tx: UnboundedSender<ReactorEvent>,
) {
    let addr = peer.address();
    for occurrence in peer.admin_start().await {
        let _ = events_tx.send(ReactorEvent::PeerOccurrence(addr, occurrence));
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => {
                        if !apply_peer_command(&mut peer, cmd, &events_tx).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            wake = peer.recv() => {
                let occurrences = match wake {
                    PeerWake::Rx(event) => peer.handle_rx(event),
                    PeerWake::Signal(timer) => peer.handle_timer(timer).await,
                };
                for occurrence in occurrences {
                    let _ = events_tx.send(ReactorEvent::PeerOccurrence(addr, occurrence));
                }
            }
        }
    }
}

struct PeerHandle {
    config: NeighborConfig,
    cmd_tx: UnboundedSender<PeerCommand>,
    _task: Task<()>,
}

fn spawn_peer(
    config: NeighborConfig,
    local_asn: u32,
    local_identifier: Ipv4Addr,
    events_tx: UnboundedSender<ReactorEvent>,
) -> PeerHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let handle_config = config.clone();
    let peer = Peer::new(config, local_asn, local_identifier);
    let task = Task::spawn(run_peer(peer, cmd_rx, events_tx));
    PeerHandle { config: handle_config, cmd_tx, _task: task }
}

fn spawn_listener(addr: SocketAddr, events_tx: UnboundedSender<ReactorEvent>) -> Option<Task<()>> {
    match connection::listen(addr) {
        Ok(listener) => Some(Task::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        if events_tx.send(ReactorEvent::Inbound(stream, peer_addr)).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        crate::error::IoError::TcpAcceptError(error).log_debug_pub();
                    }
                }
            }
        })),
        Err(error) => {
            warn!(%addr, %error, "failed to bind BGP listener");
            None
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum ReactorSignal {
    Reload,
    Dump,
    ReopenLogs,
    Shutdown,
}

enum ReactorEvent {
    Inbound(TcpStream, SocketAddr),
    PeerOccurrence(IpAddr, Occurrence),
    Signal(ReactorSignal),
}

fn spawn_signal_tasks(events_tx: UnboundedSender<ReactorEvent>) -> Vec<Task<()>> {
    let specs: [(SignalKind, ReactorSignal, &'static str); 5] = [
        (SignalKind::hangup(), ReactorSignal::Reload, "SIGHUP"),
        (SignalKind::user_defined1(), ReactorSignal::Dump, "SIGUSR1"),
        (SignalKind::user_defined2(), ReactorSignal::ReopenLogs, "SIGUSR2"),
        (SignalKind::terminate(), ReactorSignal::Shutdown, "SIGTERM"),
        (SignalKind::interrupt(), ReactorSignal::Shutdown, "SIGINT"),
    ];

    specs
        .into_iter()
        .filter_map(|(kind, signal, name)| match tokio::signal::unix::signal(kind) {
            Ok(mut stream) => {
                let tx = events_tx.clone();
                Some(Task::spawn(async move {
                    while stream.recv().await.is_some() {
                        DebugEvent::ReactorSignal(name).log(None);
                        if tx.send(ReactorEvent::Signal(signal)).is_err() {
                            break;
                        }
                    }
                }))
            }
            Err(error) => {
                warn!(%error, signal = name, "failed to install signal handler");
                None
            }
        })
        .collect()
}

/// Renders one peer `Occurrence` into the external-process event it
/// reports (spec.md §4.I / §7 "every state change and every
/// NOTIFICATION ... produces a JSON event"). `ConnectionClosed` has no
/// event of its own; the `StateChanged` occurrence accompanying it
/// already covers the transition to IDLE.
fn render_occurrence(neighbor: IpAddr, occurrence: &Occurrence) -> Option<Event<'_>> {
    Some(match occurrence {
        Occurrence::StateChanged { old, new } => {
            Event::State { neighbor, remote_asn: None, old: *old, new: *new }
        }
        Occurrence::Open(open) => Event::Open { neighbor, open },
        Occurrence::Keepalive => Event::Keepalive { neighbor },
        Occurrence::Update(changes) => Event::Update { neighbor, changes },
        Occurrence::Refresh(refresh) => Event::Refresh { neighbor, refresh },
        Occurrence::Operational(op) => Event::Operational { neighbor, op },
        Occurrence::NotificationSent(notif) => {
            Event::Notification { neighbor, sent: true, notif }
        }
        Occurrence::NotificationReceived(notif) => {
            Event::Notification { neighbor, sent: false, notif }
        }
        Occurrence::ConnectionClosed => return None,
    })
}

enum CommandOutcome {
    Done,
    Shutdown,
}

/// Owns the configuration, every neighbor's command channel, and the
/// external-process fan-out. The only task that ever runs on the
/// reactor's `LocalSet` besides the per-peer/per-listener/per-signal
/// tasks it spawns.
pub struct Reactor {
    config_path: PathBuf,
    config: Config,
    peers: HashMap<IpAddr, PeerHandle>,
    processes: Processes,
    event_cxt: EventContext,
    events_tx: UnboundedSender<ReactorEvent>,
    events_rx: UnboundedReceiver<ReactorEvent>,
    tick: tokio::time::Interval,
    _listeners: Vec<Task<()>>,
    _signals: Vec<Task<()>>,
}

impl Reactor {
    pub fn new(config_path: PathBuf, config: Config) -> Reactor {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut peers = HashMap::new();
        for neighbor in &config.instance.neighbors {
            let handle = spawn_peer(
                neighbor.clone(),
                config.instance.asn,
                config.instance.identifier,
                events_tx.clone(),
            );
            peers.insert(neighbor.address, handle);
        }

        let mut processes = Processes::new();
        processes.spawn_all(&config.instance.processes);

        let mut listeners = Vec::new();
        for addr in [
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, BGP_PORT)),
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, BGP_PORT)),
        ] {
            if let Some(task) = spawn_listener(addr, events_tx.clone()) {
                listeners.push(task);
            }
        }

        let signals = spawn_signal_tasks(events_tx.clone());

        Reactor {
            config_path,
            config,
            peers,
            processes,
            event_cxt: EventContext::new(),
            events_tx,
            events_rx,
            tick: tokio::time::interval(TICK_INTERVAL),
            _listeners: listeners,
            _signals: signals,
        }
    }

    /// Runs until a graceful shutdown completes, returning the process
    /// exit code (spec.md §6: 0 normal shutdown).
    pub async fn run(mut self) -> i32 {
        loop {
            tokio::select! {
                maybe_event = self.events_rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if let Some(code) = self.handle_event(event).await {
                                return code;
                            }
                        }
                        None => return 0,
                    }
                }
                maybe_line = self.processes.lines_rx.recv() => {
                    if let Some(line) = maybe_line {
                        self.handle_inbound_line(line).await;
                    }
                }
                _ = self.tick.tick() => {
                    self.on_tick();
                }
            }
        }
    }

    fn on_tick(&mut self) {
        self.processes.reap_and_respawn();
        for child in &self.processes.children {
            if child.drain_timed_out() {
                warn!(process = %child.config.name, "external process write queue stalled past backpressure timeout");
            }
        }
    }

    async fn handle_event(&mut self, event: ReactorEvent) -> Option<i32> {
        match event {
            ReactorEvent::Inbound(stream, peer_addr) => {
                match self.peers.get(&peer_addr.ip()) {
                    Some(handle) => {
                        let _ = handle.cmd_tx.send(PeerCommand::Accept(stream));
                    }
                    None => {
                        debug!(address = %peer_addr, "rejecting connection from unconfigured neighbor");
                    }
                }
                None
            }
            ReactorEvent::PeerOccurrence(addr, occurrence) => {
                if let Some(event) = render_occurrence(addr, &occurrence) {
                    let event_cxt = &mut self.event_cxt;
                    self.processes.broadcast(Some(addr), move |encoder| event.render(encoder, event_cxt));
                }
                None
            }
            ReactorEvent::Signal(ReactorSignal::Reload) => {
                if let Err(error) = self.reload().await {
                    warn!(%error, "configuration reload failed");
                } else {
                    DebugEvent::ReactorReload.log(None);
                }
                None
            }
            ReactorEvent::Signal(ReactorSignal::Dump) => {
                self.dump_runtime_state().await;
                None
            }
            ReactorEvent::Signal(ReactorSignal::ReopenLogs) => {
                info!("SIGUSR2 received; log reopen is a no-op with the default stderr layer");
                None
            }
            ReactorEvent::Signal(ReactorSignal::Shutdown) => {
                self.shutdown_gracefully().await;
                Some(0)
            }
        }
    }

    async fn shutdown_gracefully(&mut self) {
        info!("shutting down");
        for handle in self.peers.values() {
            let _ = handle.cmd_tx.send(PeerCommand::Shutdown);
        }
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    }

    async fn dump_runtime_state(&mut self) {
        DebugEvent::ReactorSignal("SIGUSR1").log(None);
        match self.gather_snapshots(None).await {
            Ok(snapshots) => {
                for snapshot in snapshots {
                    info!("{}", snapshot.render());
                }
            }
            Err(error) => warn!(%error, "failed to gather peer runtime state"),
        }
    }

    /// Reloads configuration from disk (spec.md §4.I reload semantics:
    /// "a config reload MUST be applied atomically with respect to route
    /// events"). This reactor never processes an UPDATE between picking
    /// up the new config and finishing this function, since route
    /// processing for every peer happens inside that peer's own task,
    /// which only receives the `Reload`/`Remove` command after this
    /// function returns.
    async fn reload(&mut self) -> Result<(), ConfigError> {
        let new_config = Config::load(&self.config_path)?;

        let mut seen = HashSet::new();
        for neighbor in &new_config.instance.neighbors {
            seen.insert(neighbor.address);
            match self.peers.get(&neighbor.address) {
                Some(handle) if handle.config.remote_as == neighbor.remote_as => {
                    let _ = handle.cmd_tx.send(PeerCommand::Reload(neighbor.clone()));
                    if let Some(handle) = self.peers.get_mut(&neighbor.address) {
                        handle.config = neighbor.clone();
                    }
                }
                Some(_) => {
                    if let Some(handle) = self.peers.remove(&neighbor.address) {
                        let _ = handle.cmd_tx.send(PeerCommand::Remove(CeaseSubcode::OtherConfigurationChange));
                    }
                    let handle = spawn_peer(
                        neighbor.clone(),
                        new_config.instance.asn,
                        new_config.instance.identifier,
                        self.events_tx.clone(),
                    );
                    self.peers.insert(neighbor.address, handle);
                }
                None => {
                    let handle = spawn_peer(
                        neighbor.clone(),
                        new_config.instance.asn,
                        new_config.instance.identifier,
                        self.events_tx.clone(),
                    );
                    self.peers.insert(neighbor.address, handle);
                }
            }
        }

        let removed: Vec<IpAddr> =
            self.peers.keys().filter(|addr| !seen.contains(addr)).cloned().collect();
        for addr in removed {
            if let Some(handle) = self.peers.remove(&addr) {
                let _ = handle.cmd_tx.send(PeerCommand::Remove(CeaseSubcode::OtherConfigurationChange));
            }
        }

        // External-process children aren't re-diffed on reload: spec.md
        // scopes reload atomicity to peers and route events, and the set
        // of subscriber processes is ordinarily static for a daemon's
        // lifetime.
        self.config = new_config;
        Ok(())
    }

    fn process_by_name(&mut self, name: &str) -> Option<&mut crate::process::ExternalProcess> {
        self.processes.children.iter_mut().find(|child| child.config.name == name)
    }

    async fn dispatch_route_change(
        &self,
        neighbor: Option<IpAddr>,
        change: RouteChange,
        announce: bool,
    ) -> Result<(), String> {
        let targets = self.resolve_targets(neighbor)?;

        let mut acks = Vec::with_capacity(targets.len());
        for handle in targets {
            let (ack_tx, ack_rx) = oneshot::channel();
            let cmd = if announce {
                PeerCommand::Announce(change.clone(), Some(ack_tx))
            } else {
                PeerCommand::Withdraw(change.clone(), Some(ack_tx))
            };
            if handle.cmd_tx.send(cmd).is_ok() {
                acks.push(ack_rx);
            }
        }
        for ack in acks {
            let _ = ack.await;
        }
        Ok(())
    }

    async fn dispatch_adj_rib_out(&self, neighbor: Option<IpAddr>, clear: bool) -> Result<usize, String> {
        let targets = self.resolve_targets(neighbor)?;

        let mut total = 0;
        for handle in targets {
            let (tx, rx) = oneshot::channel();
            let cmd = if clear {
                PeerCommand::ClearAdjRibOut(Some(tx))
            } else {
                PeerCommand::FlushAdjRibOut(Some(tx))
            };
            if handle.cmd_tx.send(cmd).is_ok() {
                if let Ok(n) = rx.await {
                    total += n;
                }
            }
        }
        Ok(total)
    }

    async fn gather_snapshots(&self, neighbor: Option<IpAddr>) -> Result<Vec<PeerSnapshot>, String> {
        let targets = self.resolve_targets(neighbor)?;

        let mut snapshots = Vec::with_capacity(targets.len());
        for handle in targets {
            let (tx, rx) = oneshot::channel();
            if handle.cmd_tx.send(PeerCommand::Show(tx)).is_ok() {
                if let Ok(snapshot) = rx.await {
                    snapshots.push(snapshot);
                }
            }
        }
        Ok(snapshots)
    }

    fn resolve_targets(&self, neighbor: Option<IpAddr>) -> Result<Vec<&PeerHandle>, String> {
        match neighbor {
            Some(addr) => match self.peers.get(&addr) {
                Some(handle) => Ok(vec![handle]),
                None => Err(format!("unknown neighbor: {addr}")),
            },
            None => Ok(self.peers.values().collect()),
        }
    }

    async fn queue_status(&mut self) -> String {
        let mut total_out = 0usize;
        for handle in self.peers.values() {
            let (tx, rx) = oneshot::channel();
            if handle.cmd_tx.send(PeerCommand::QueueStatus(tx)).is_ok() {
                if let Ok(n) = rx.await {
                    total_out += n;
                }
            }
        }
        let children = self.processes.children.len();
        format!("queue-status adj-rib-out-pending {total_out} external-processes {children}")
    }

    async fn apply_command(&mut self, process_name: &str, cmd: Command) -> Result<CommandOutcome, String> {
        match cmd {
            Command::Announce { neighbor, change } => {
                self.dispatch_route_change(neighbor, change, true).await?;
                Ok(CommandOutcome::Done)
            }
            Command::Withdraw { neighbor, change } => {
                self.dispatch_route_change(neighbor, change, false).await?;
                Ok(CommandOutcome::Done)
            }
            Command::ShowNeighbor { neighbor } => {
                let snapshots = self.gather_snapshots(neighbor).await?;
                let lines: Vec<String> = snapshots.iter().map(PeerSnapshot::render).collect();
                if let Some(child) = self.process_by_name(process_name) {
                    for line in lines {
                        child.send_event(line);
                    }
                }
                Ok(CommandOutcome::Done)
            }
            Command::QueueStatus => {
                let line = self.queue_status().await;
                if let Some(child) = self.process_by_name(process_name) {
                    child.send_event(line);
                }
                Ok(CommandOutcome::Done)
            }
            Command::ClearAdjRibOut { neighbor } => {
                self.dispatch_adj_rib_out(neighbor, true).await?;
                Ok(CommandOutcome::Done)
            }
            Command::FlushAdjRibOut { neighbor } => {
                self.dispatch_adj_rib_out(neighbor, false).await?;
                Ok(CommandOutcome::Done)
            }
            Command::Reload => {
                self.reload().await.map_err(|error| error.to_string())?;
                DebugEvent::ReactorReload.log(None);
                Ok(CommandOutcome::Done)
            }
            Command::Shutdown => {
                self.shutdown_gracefully().await;
                Ok(CommandOutcome::Shutdown)
            }
        }
    }

    /// Handles one complete line read from an external process's stdout
    /// (spec.md §4.I/§6): parse it into a `Command`, apply it, and — if
    /// that child has `ack` enabled — write exactly one `done`/`error
    /// <message>`/`shutdown` reply back on its stdin.
    async fn handle_inbound_line(&mut self, line: InboundLine) {
        let InboundLine { process, line } = line;
        let ack_enabled = self
            .processes
            .children
            .iter()
            .find(|child| child.config.name == process)
            .map(|child| child.config.ack)
            .unwrap_or(false);

        let outcome = match command::parse(&line) {
            Ok(cmd) => self.apply_command(&process, cmd).await,
            Err(error) => Err(error.to_string()),
        };

        if let Err(error) = &outcome {
            warn!(%process, %error, "external-process command failed");
        }

        if !ack_enabled {
            return;
        }
        let reply = match outcome {
            Ok(CommandOutcome::Done) => Reply::Done,
            Ok(CommandOutcome::Shutdown) => Reply::Shutdown,
            Err(message) => Reply::Error(message),
        };
        if let Some(child) = self.process_by_name(&process) {
            child.send_reply(reply);
        }
    }
}
