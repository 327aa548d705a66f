//
// External-process event stream (spec.md §4.I / §6). Grounded in
// holo-bgp's `events.rs` (the `process_*` functions that turn a protocol
// occurrence into a northbound notification) but retargeted: instead of a
// YANG notification this crate's events are JSON objects (or, with the
// `text` encoder, plain lines) written to each subscribed external
// process's stdin, matching ExaBGP's own API wire format rather than
// holo's NETCONF one.
//

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use crate::config::ProcessEncoder;
use crate::fsm::State;
use crate::negotiate::Negotiated;
use crate::packet::attribute::Attributes;
use crate::packet::message::{NotificationMsg, OpenMsg, OperationalMsg, RouteRefreshMsg};
use crate::packet::nlri::{Family, Nlri, NlriData};
use crate::rib::Change;

/// Per-process book-keeping needed to stamp every event (spec.md §6):
/// `exabgp`, `host`, `pid`, `ppid` are constant for the process's
/// lifetime; `counter` increments once per event emitted to any child.
#[derive(Clone, Debug)]
pub struct EventContext {
    pub version: &'static str,
    pub host: String,
    pub pid: u32,
    pub ppid: u32,
    pub counter: u64,
}

impl EventContext {
    pub fn new() -> EventContext {
        EventContext {
            version: env!("CARGO_PKG_VERSION"),
            host: hostname(),
            pid: std::process::id(),
            ppid: parent_pid(),
            counter: 0,
        }
    }

    fn next_counter(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn epoch_secs(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
    }

    fn envelope(&mut self, kind: &str, neighbor: Option<IpAddr>, message: Value) -> Value {
        let counter = self.next_counter();
        json!({
            "exabgp": self.version,
            "time": self.epoch_secs(),
            "host": self.host,
            "pid": self.pid,
            "ppid": self.ppid,
            "counter": counter,
            "type": kind,
            "neighbor": neighbor.map(|a| json!({"address": a.to_string()})),
            "message": message,
        })
    }
}

impl Default for EventContext {
    fn default() -> EventContext {
        EventContext::new()
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn parent_pid() -> u32 {
    nix::unistd::getppid().as_raw() as u32
}

/// One occurrence worth reporting to subscribed external processes
/// (spec.md §4.I / §7 "every state change and every NOTIFICATION ...
/// produces a JSON event").
#[derive(Clone, Debug)]
pub enum Event<'a> {
    State { neighbor: IpAddr, remote_asn: Option<u32>, old: State, new: State },
    Notification { neighbor: IpAddr, sent: bool, notif: &'a NotificationMsg },
    Open { neighbor: IpAddr, open: &'a OpenMsg },
    Keepalive { neighbor: IpAddr },
    Update { neighbor: IpAddr, changes: &'a [(Family, Nlri, Change)] },
    Refresh { neighbor: IpAddr, refresh: &'a RouteRefreshMsg },
    Operational { neighbor: IpAddr, op: &'a OperationalMsg },
    Signal { name: &'static str },
}

impl Event<'_> {
    fn neighbor(&self) -> Option<IpAddr> {
        match self {
            Event::State { neighbor, .. }
            | Event::Notification { neighbor, .. }
            | Event::Open { neighbor, .. }
            | Event::Keepalive { neighbor }
            | Event::Update { neighbor, .. }
            | Event::Refresh { neighbor, .. }
            | Event::Operational { neighbor, .. } => Some(*neighbor),
            Event::Signal { .. } => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Event::State { .. } => "state",
            Event::Notification { .. } => "notification",
            Event::Open { .. } => "open",
            Event::Keepalive { .. } => "keepalive",
            Event::Update { .. } => "update",
            Event::Refresh { .. } => "refresh",
            Event::Operational { .. } => "operational",
            Event::Signal { .. } => "signal",
        }
    }

    /// Encodes this event per the configured `encoder` (spec.md §6),
    /// returning the single line (sans trailing newline) to write to a
    /// subscribed child's stdin.
    pub fn render(&self, encoder: ProcessEncoder, cxt: &mut EventContext) -> String {
        match encoder {
            ProcessEncoder::Json => self.render_json(cxt),
            ProcessEncoder::Text => self.render_text(),
        }
    }

    fn render_json(&self, cxt: &mut EventContext) -> String {
        let message = self.message_json();
        let envelope = cxt.envelope(self.kind(), self.neighbor(), message);
        envelope.to_string()
    }

    fn message_json(&self) -> Value {
        match self {
            Event::State { remote_asn, old, new, .. } => json!({
                "asn": remote_asn,
                "state": format!("{new:?}").to_lowercase(),
                "old_state": format!("{old:?}").to_lowercase(),
            }),
            Event::Notification { sent, notif, .. } => json!({
                "direction": if *sent { "send" } else { "receive" },
                "code": notif.error_code,
                "subcode": notif.error_subcode,
                "data": notif.data,
            }),
            Event::Open { open, .. } => json!({
                "version": open.version,
                "asn": open.real_as(),
                "hold_time": open.holdtime,
                "router_id": open.identifier.to_string(),
                "capabilities": open.capabilities.len(),
            }),
            Event::Keepalive { .. } => json!({}),
            Event::Update { changes, .. } => update_message_json(changes),
            Event::Refresh { refresh, .. } => json!({
                "afi": format!("{:?}", refresh.family.afi).to_lowercase(),
                "safi": format!("{:?}", refresh.family.safi).to_lowercase(),
                "subtype": format!("{:?}", refresh.subtype).to_lowercase(),
            }),
            Event::Operational { op, .. } => json!({ "raw": op.raw }),
            Event::Signal { name } => json!({ "signal": name }),
        }
    }

    fn render_text(&self) -> String {
        match self {
            Event::State { neighbor, old, new, .. } => {
                format!("neighbor {neighbor} state {old:?} -> {new:?}")
            }
            Event::Notification { neighbor, sent, notif, .. } => format!(
                "neighbor {neighbor} notification {} code {} subcode {}",
                if *sent { "sent" } else { "received" },
                notif.error_code,
                notif.error_subcode
            ),
            Event::Open { neighbor, open, .. } => {
                format!("neighbor {neighbor} open asn {} holdtime {}", open.real_as(), open.holdtime)
            }
            Event::Keepalive { neighbor } => format!("neighbor {neighbor} keepalive"),
            Event::Update { neighbor, changes, .. } => {
                let announced = changes.iter().filter(|(_, n, _)| n.action == crate::packet::nlri::Action::Announce).count();
                let withdrawn = changes.len() - announced;
                format!("neighbor {neighbor} update announced {announced} withdrawn {withdrawn}")
            }
            Event::Refresh { neighbor, refresh, .. } => {
                format!("neighbor {neighbor} route-refresh {:?}/{:?}", refresh.family.afi, refresh.family.safi)
            }
            Event::Operational { neighbor, op } => {
                format!("neighbor {neighbor} operational {} bytes", op.raw.len())
            }
            Event::Signal { name } => format!("signal {name}"),
        }
    }
}

/// Family name used as a JSON object key (spec.md §6:
/// "announce/withdraw sub-objects keyed by family name").
fn family_name(family: Family) -> String {
    format!("{:?}/{:?}", family.afi, family.safi).to_lowercase()
}

/// Textual rendering of one NLRI, used as the key inside a family's
/// announce/withdraw map. IP prefixes render as their natural CIDR
/// string; the remaining families (EVPN, FlowSpec, BGP-LS, ...) render
/// via `Debug` — a full bespoke per-family text grammar is ExaBGP's own
/// route-string DSL, which spec.md §1 places out of scope alongside the
/// rest of the configuration grammar.
fn nlri_key(data: &NlriData) -> String {
    match data {
        NlriData::Ipv4Unicast(p) | NlriData::Ipv4Multicast(p) => p.to_string(),
        NlriData::Ipv6Unicast(p) | NlriData::Ipv6Multicast(p) => p.to_string(),
        other => format!("{other:?}"),
    }
}

fn attrs_json(attrs: &Attributes) -> Value {
    let mut map = serde_json::Map::new();
    if let Some(origin) = attrs.origin {
        map.insert("origin".into(), json!(format!("{origin:?}").to_lowercase()));
    }
    if !attrs.as_path.segments.is_empty() {
        let path: Vec<Vec<u32>> = attrs.as_path.segments.iter().map(|s| s.members.clone()).collect();
        map.insert("as-path".into(), json!(path));
    }
    if let Some(nexthop) = attrs.nexthop {
        map.insert("next-hop".into(), json!(nexthop.to_string()));
    }
    if let Some(med) = attrs.med {
        map.insert("med".into(), json!(med));
    }
    if let Some(lp) = attrs.local_pref {
        map.insert("local-preference".into(), json!(lp));
    }
    if attrs.atomic_aggregate {
        map.insert("atomic-aggregate".into(), json!(true));
    }
    if let Some(communities) = &attrs.communities {
        let rendered: Vec<String> =
            communities.iter().map(|c| format!("{}:{}", c >> 16, c & 0xFFFF)).collect();
        map.insert("community".into(), json!(rendered));
    }
    if let Some(large) = &attrs.large_communities {
        let rendered: Vec<String> =
            large.iter().map(|(a, b, c)| format!("{a}:{b}:{c}")).collect();
        map.insert("large-community".into(), json!(rendered));
    }
    if let Some(aigp) = attrs.aigp {
        map.insert("aigp".into(), json!(aigp));
    }
    if !map.contains_key("next-hop") {
        if let Some(mp_reach) = &attrs.mp_reach {
            if mp_reach.nexthop.len() == 4 {
                let octets: [u8; 4] = mp_reach.nexthop[..4].try_into().unwrap();
                map.insert("next-hop".into(), json!(std::net::Ipv4Addr::from(octets).to_string()));
            } else if mp_reach.nexthop.len() >= 16 {
                let octets: [u8; 16] = mp_reach.nexthop[..16].try_into().unwrap();
                map.insert("next-hop".into(), json!(std::net::Ipv6Addr::from(octets).to_string()));
            }
        }
    }
    Value::Object(map)
}

fn update_message_json(changes: &[(Family, Nlri, Change)]) -> Value {
    let mut announce = serde_json::Map::new();
    let mut withdraw = serde_json::Map::new();
    let mut shared_attrs: Option<&Attributes> = None;

    for (family, nlri, change) in changes {
        let fam = family_name(*family);
        let key = nlri_key(&nlri.data);
        match change {
            Change::Announce(attrs) => {
                shared_attrs.get_or_insert(attrs);
                announce
                    .entry(fam)
                    .or_insert_with(|| json!({}))
                    .as_object_mut()
                    .unwrap()
                    .insert(key, json!({}));
            }
            Change::Withdraw => {
                withdraw
                    .entry(fam)
                    .or_insert_with(|| json!({}))
                    .as_object_mut()
                    .unwrap()
                    .insert(key, Value::Null);
            }
        }
    }

    let mut out = serde_json::Map::new();
    if let Some(attrs) = shared_attrs {
        out.insert("attribute".into(), attrs_json(attrs));
    }
    if !announce.is_empty() {
        out.insert("announce".into(), Value::Object(announce));
    }
    if !withdraw.is_empty() {
        out.insert("withdraw".into(), Value::Object(withdraw));
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::nlri::Action;
    use ipnetwork::Ipv4Network;

    fn nlri(prefix: &str, action: Action) -> Nlri {
        Nlri {
            family: Family::IPV4_UNICAST,
            action,
            path_id: None,
            data: NlriData::Ipv4Unicast(prefix.parse::<Ipv4Network>().unwrap()),
        }
    }

    #[test]
    fn update_json_has_announce_and_attribute() {
        let attrs = Attributes { med: Some(5), ..Attributes::default() };
        let changes = vec![(
            Family::IPV4_UNICAST,
            nlri("10.0.0.0/24", Action::Announce),
            Change::Announce(attrs),
        )];
        let event = Event::Update { neighbor: "192.0.2.2".parse().unwrap(), changes: &changes };
        let mut cxt = EventContext::new();
        let line = event.render(ProcessEncoder::Json, &mut cxt);
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "update");
        assert!(value["message"]["announce"]["ipv4/unicast"]["10.0.0.0/24"].is_object());
        assert_eq!(value["message"]["attribute"]["med"], 5);
    }

    #[test]
    fn update_json_withdraw_key_is_null() {
        let changes = vec![(Family::IPV4_UNICAST, nlri("10.0.0.0/24", Action::Withdraw), Change::Withdraw)];
        let event = Event::Update { neighbor: "192.0.2.2".parse().unwrap(), changes: &changes };
        let mut cxt = EventContext::new();
        let line = event.render(ProcessEncoder::Json, &mut cxt);
        let value: Value = serde_json::from_str(&line).unwrap();
        assert!(value["message"]["withdraw"]["ipv4/unicast"]["10.0.0.0/24"].is_null());
    }

    #[test]
    fn counter_increments_across_events() {
        let mut cxt = EventContext::new();
        let e1 = Event::Keepalive { neighbor: "192.0.2.2".parse().unwrap() };
        let e2 = Event::Keepalive { neighbor: "192.0.2.2".parse().unwrap() };
        let l1: Value = serde_json::from_str(&e1.render(ProcessEncoder::Json, &mut cxt)).unwrap();
        let l2: Value = serde_json::from_str(&e2.render(ProcessEncoder::Json, &mut cxt)).unwrap();
        assert_eq!(l1["counter"].as_u64().unwrap() + 1, l2["counter"].as_u64().unwrap());
    }

    #[test]
    fn text_encoder_state_line() {
        let event = Event::State {
            neighbor: "192.0.2.2".parse().unwrap(),
            remote_asn: Some(65002),
            old: State::OpenConfirm,
            new: State::Established,
        };
        let mut cxt = EventContext::new();
        let line = event.render(ProcessEncoder::Text, &mut cxt);
        assert!(line.contains("OpenConfirm -> Established"));
    }
}
