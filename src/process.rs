//
// External-process children (spec.md §3 `ExternalProcess` / §4.I / §6).
// Grounded in holo-bgp's `tasks.rs` task-spawning shape (a `Task` per
// I/O direction talking back to the owner over a channel) generalized
// from TCP peers to a child process's stdin/stdout pipes, plus the
// write-queue backpressure spec.md §4.I calls for, which holo-bgp (no
// child processes of its own) has no counterpart for.
//

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{info_span, warn};

use crate::config::ProcessConfig;
use crate::error::ExternalError;
use crate::util::task::Task;

/// Backpressure watermarks (spec.md §4.I): writes pause once the pending
/// queue exceeds `HIGH_WATER` and resume once it drains below
/// `LOW_WATER`. Values aren't specified numerically by spec.md; chosen
/// to absorb a JSON event burst from one UPDATE's worth of NLRI without
/// unbounded growth.
pub const HIGH_WATER: usize = 1024;
pub const LOW_WATER: usize = 256;

/// How long a write may stay paused above `LOW_WATER` before it's
/// reported as a stalled child (spec.md §4.I: "if a timeout elapses
/// without drain, report a write error and continue").
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// One line read from a child's stdout, tagged with the child's
/// configured name so the reactor's command queue (spec.md §5 step 2)
/// knows which `ack` policy applies to the reply.
#[derive(Debug)]
pub struct InboundLine {
    pub process: String,
    pub line: String,
}

/// Reply a processed command produces back to the child that issued it
/// (spec.md §6 Acknowledgement), only written if the child's `ack` is
/// enabled.
#[derive(Clone, Debug)]
pub enum Reply {
    Done,
    Error(String),
    Shutdown,
}

impl Reply {
    fn render(&self) -> String {
        match self {
            Reply::Done => "done".to_string(),
            Reply::Error(msg) => format!("error {msg}"),
            Reply::Shutdown => "shutdown".to_string(),
        }
    }
}

enum WriteCommand {
    Event(String),
    Reply(Reply),
}

/// A spawned external process (spec.md §3 `ExternalProcess`): its child
/// handle, a write task owning stdin with its own backpressure queue, and
/// a read task forwarding complete stdout lines to the reactor.
pub struct ExternalProcess {
    pub config: ProcessConfig,
    child: Child,
    write_tx: UnboundedSender<WriteCommand>,
    _read_task: Task<()>,
    _write_task: Task<()>,
    pending: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    paused_since: Option<Instant>,
}

impl ExternalProcess {
    /// Spawns the configured child, wiring its stdin/stdout (spec.md
    /// §4.I). `lines_tx` receives every complete line the child writes to
    /// its stdout, tagged with `config.name`.
    pub fn spawn(
        config: ProcessConfig,
        lines_tx: UnboundedSender<InboundLine>,
    ) -> Result<ExternalProcess, ExternalError> {
        let mut child = ProcessCommand::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExternalError::Spawn)?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stdin = child.stdin.take().expect("stdin was piped");

        let name = config.name.clone();
        let read_task = Task::spawn(async move {
            let span = info_span!("external", process = %name);
            let _enter = span.enter();
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if lines_tx.send(InboundLine { process: name.clone(), line }).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!(%error, "failed to read from external process");
                        break;
                    }
                }
            }
        });

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let pending = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let pending_writer = pending.clone();
        let name = config.name.clone();
        let write_task = Task::spawn(async move {
            write_loop(config_name_span(&name), stdin, write_rx, pending_writer).await;
        });

        Ok(ExternalProcess {
            config,
            child,
            write_tx,
            _read_task: read_task,
            _write_task: write_task,
            pending,
            paused_since: None,
        })
    }

    /// Queues one JSON/text event line for this child (spec.md §4.I).
    /// Returns `false` if the child is currently paused above
    /// `HIGH_WATER` and the caller should skip writing further events
    /// until it drains.
    pub fn send_event(&mut self, line: String) -> bool {
        if self.is_paused() {
            return false;
        }
        let _ = self.write_tx.send(WriteCommand::Event(line));
        self.pending.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        true
    }

    /// Queues a command acknowledgement (spec.md §6), bypassing the
    /// backpressure check — acks are small and must not be starved by a
    /// paused event stream.
    pub fn send_reply(&mut self, reply: Reply) {
        let _ = self.write_tx.send(WriteCommand::Reply(reply));
    }

    fn pending_count(&self) -> usize {
        self.pending.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Backpressure gate (spec.md §4.I): once the pending count crosses
    /// `HIGH_WATER` writes pause; once it drops back below `LOW_WATER`
    /// they resume. Call once per reactor tick.
    pub fn is_paused(&mut self) -> bool {
        let pending = self.pending_count();
        match self.paused_since {
            Some(_) if pending < LOW_WATER => {
                self.paused_since = None;
                false
            }
            Some(_) => true,
            None if pending > HIGH_WATER => {
                self.paused_since = Some(Instant::now());
                true
            }
            None => false,
        }
    }

    /// Whether this child has been paused longer than `DRAIN_TIMEOUT`
    /// without draining (spec.md §4.I: report and continue).
    pub fn drain_timed_out(&self) -> bool {
        self.paused_since.map(|since| since.elapsed() > DRAIN_TIMEOUT).unwrap_or(false)
    }

    pub fn subscribed(&self, neighbor: std::net::IpAddr) -> bool {
        self.config.neighbors.is_empty() || self.config.neighbors.contains(&neighbor)
    }

    /// Polls whether the child has exited, without blocking.
    pub fn try_wait_exit(&mut self) -> Option<Option<i32>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            _ => None,
        }
    }
}

fn config_name_span(name: &str) -> tracing::Span {
    info_span!("external", process = %name)
}

async fn write_loop(
    span: tracing::Span,
    mut stdin: tokio::process::ChildStdin,
    mut rx: UnboundedReceiver<WriteCommand>,
    pending: std::sync::Arc<std::sync::atomic::AtomicUsize>,
) {
    let _enter = span.enter();
    while let Some(cmd) = rx.recv().await {
        let (line, is_event) = match cmd {
            WriteCommand::Event(line) => (line, true),
            WriteCommand::Reply(reply) => (reply.render(), false),
        };
        let mut line = line;
        line.push('\n');
        if let Err(error) = stdin.write_all(line.as_bytes()).await {
            warn!(%error, "failed to write to external process");
        }
        if is_event {
            pending.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        }
    }
}

/// Holds every configured external process, keyed by name, and the
/// shared inbound-line channel the reactor drains each tick.
pub struct Processes {
    pub children: Vec<ExternalProcess>,
    pub lines_rx: UnboundedReceiver<InboundLine>,
    lines_tx: UnboundedSender<InboundLine>,
}

impl Processes {
    pub fn new() -> Processes {
        let (lines_tx, lines_rx) = mpsc::unbounded_channel();
        Processes { children: vec![], lines_rx, lines_tx }
    }

    pub fn spawn_all(&mut self, configs: &[ProcessConfig]) {
        for config in configs {
            match ExternalProcess::spawn(config.clone(), self.lines_tx.clone()) {
                Ok(process) => {
                    crate::debug::Debug::ExternalSpawned {
                        name: &process.config.name,
                        pid: process.child.id().unwrap_or(0),
                    }
                    .log(None);
                    self.children.push(process);
                }
                Err(error) => {
                    warn!(name = %config.name, %error, "failed to spawn external process");
                }
            }
        }
    }

    /// Broadcasts one rendered event line to every child subscribed to
    /// `neighbor` (spec.md §4.I). Children paused over `HIGH_WATER` are
    /// skipped, per the backpressure contract.
    pub fn broadcast(&mut self, neighbor: Option<std::net::IpAddr>, mut render: impl FnMut(crate::config::ProcessEncoder) -> String) {
        for child in &mut self.children {
            if let Some(neighbor) = neighbor {
                if !child.subscribed(neighbor) {
                    continue;
                }
            }
            let line = render(child.config.encoder);
            child.send_event(line);
        }
    }

    /// Re-spawns any child configured with `respawn` that has exited
    /// (spec.md §3 `ExternalProcess` lifecycle), called once per tick.
    pub fn reap_and_respawn(&mut self) {
        let mut respawn = vec![];
        self.children.retain_mut(|child| {
            if let Some(status) = child.try_wait_exit() {
                crate::debug::Debug::ExternalExited { name: &child.config.name, status }.log(None);
                if child.config.respawn {
                    respawn.push(child.config.clone());
                }
                false
            } else {
                true
            }
        });
        self.spawn_all(&respawn);
    }
}

impl Default for Processes {
    fn default() -> Processes {
        Processes::new()
    }
}
