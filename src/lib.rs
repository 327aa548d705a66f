//
// A BGP-4 speaker with a scriptable external-process control plane
// (spec.md OVERVIEW). Modules mirror holo-bgp's own split of concerns —
// wire format in `packet`, session state machine in `fsm`, a single
// neighbor's lifetime in `peer`, per-peer RIBs in `rib` — plus the two
// components holo-bgp has no counterpart for: `command`/`process` for
// the external-process control channel, and `reactor` tying everything
// together into one cooperative event loop instead of holo's
// northbound-driven multi-instance daemon.
//

#![warn(rust_2018_idioms)]

pub mod command;
pub mod config;
pub mod connection;
pub mod debug;
pub mod error;
pub mod events;
pub mod fsm;
pub mod negotiate;
pub mod packet;
pub mod peer;
pub mod process;
pub mod reactor;
pub mod rib;
pub mod util;
