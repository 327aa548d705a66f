//
// Structured debug/info logging. Grounded in holo-bgp's debug.rs: a single
// `Debug` enum with one variant per loggable event and a `.log()` method
// that picks the `tracing` macro and fields for that event, instead of
// scattering ad hoc `debug!()`/`info!()` calls through fsm.rs/reactor.rs.
//

use std::net::IpAddr;

use tracing::{debug, debug_span, info, warn};

use crate::fsm::{Event, State};
use crate::packet::message::Message;

#[derive(Debug)]
pub enum Debug<'a> {
    /// FSM transitioned, driven by `event`.
    FsmTransition { old_state: State, new_state: State, event: &'a Event },
    /// An event was received but ignored by the current state.
    FsmEventIgnored { state: State, event: &'a Event },
    MessageRx(&'a Message),
    MessageTx(&'a Message),
    ConnectionAccepted,
    ConnectionEstablished,
    ConnectionClosed(&'a str),
    ExternalSpawned { name: &'a str, pid: u32 },
    ExternalExited { name: &'a str, status: Option<i32> },
    ReactorReload,
    ReactorSignal(&'a str),
}

impl Debug<'_> {
    pub fn log(&self, neighbor: Option<IpAddr>) {
        let neighbor = neighbor.map(|a| a.to_string()).unwrap_or_else(|| "-".to_owned());
        let span = debug_span!("peer", %neighbor);
        let _enter = span.enter();

        match self {
            Debug::FsmTransition { old_state, new_state, event } => {
                debug!(?old_state, ?new_state, ?event, "FSM transition");
            }
            Debug::FsmEventIgnored { state, event } => {
                debug!(?state, ?event, "event ignored in current state");
            }
            Debug::MessageRx(msg) => {
                debug!(?msg, "message received");
            }
            Debug::MessageTx(msg) => {
                debug!(?msg, "message sent");
            }
            Debug::ConnectionAccepted => {
                debug!("TCP connection accepted");
            }
            Debug::ConnectionEstablished => {
                info!("session established");
            }
            Debug::ConnectionClosed(reason) => {
                info!(%reason, "connection closed");
            }
            Debug::ExternalSpawned { name, pid } => {
                info!(%name, pid, "external process spawned");
            }
            Debug::ExternalExited { name, status } => {
                warn!(%name, ?status, "external process exited");
            }
            Debug::ReactorReload => {
                info!("configuration reloaded");
            }
            Debug::ReactorSignal(signal) => {
                debug!(%signal, "signal received");
            }
        }
    }
}
