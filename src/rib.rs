//
// Per-peer RIB (spec.md §4.H): outbound change queue and inbound snapshot.
// Grounded in the *shape* of holo-bgp's `AdjRib` (rib.rs) — an in/out pair
// keyed by route identity — but deliberately not its `RoutingTable`/
// `Destination`/tie-break machinery: spec.md scopes this component to
// per-peer change queues with dedup and withdraw ordering, not a
// multi-peer best-path decision process, since routes only ever enter a
// peer's adj-rib-out from local configuration or an external-process
// command, never from another peer's adj-rib-in.
//

use std::collections::BTreeMap;

use bytes::BytesMut;

use crate::packet::attribute::{Attributes, MpReachNlri, MpUnreachNlri};
use crate::packet::message::UpdateMsg;
use crate::packet::nlri::{Action, Family, Nlri, NlriKey};

/// One pending mutation for a route identity. Only `Announce` carries
/// attributes; a `Withdraw` entry's attributes are never encoded.
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    Announce(Attributes),
    Withdraw,
}

impl Change {
    fn action(&self) -> Action {
        match self {
            Change::Announce(_) => Action::Announce,
            Change::Withdraw => Action::Withdraw,
        }
    }
}

/// Per-peer outbound change queue (spec.md §4.H). Keys are route identity
/// (`NlriKey`, which excludes `action` by construction); `add` always
/// overwrites the prior pending change for that key, which is what makes
/// the idempotence-under-overwrite property in spec.md §8 hold for free.
///
/// Callers announcing a non-IPv4-unicast route must set
/// `Attributes::mp_reach` to `Some(MpReachNlri { family, nexthop, nlri:
/// vec![] })` — the empty `nlri` is a placeholder `drain` fills in, and
/// its presence is what tells `drain` which family the change belongs to
/// when the key's own family isn't IPv4 unicast.
#[derive(Default)]
pub struct AdjRibOut {
    pending: BTreeMap<NlriKey, Change>,
}

/// Rough byte accounting used by `drain` to stay under a message's size
/// budget. Doesn't need to be exact: actual encoding re-measures nothing,
/// it just stops adding NLRIs once the running estimate would exceed the
/// caller-supplied budget.
fn nlri_len(nlri: &Nlri, addpath: bool) -> usize {
    let mut scratch = BytesMut::new();
    nlri.encode(&mut scratch, addpath);
    scratch.len()
}

impl AdjRibOut {
    pub fn new() -> AdjRibOut {
        AdjRibOut::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Replaces any pending change for `key` (spec.md §4.H invariant: "a
    /// withdraw supersedes a prior pending announce for the same key and
    /// vice versa").
    pub fn add(&mut self, key: NlriKey, change: Change) {
        self.pending.insert(key, change);
    }

    pub fn remove_all(&mut self, keys: impl IntoIterator<Item = NlriKey>) {
        for key in keys {
            self.pending.remove(&key);
        }
    }

    /// Drops every pending change, returning the number dropped. Backs
    /// the "clear adj-rib-out" external command (spec.md §4.I).
    pub fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    /// Builds at most one UPDATE from the pending queue: an announce
    /// batch sharing one `Attributes` value, in one family, plus every
    /// pending withdraw in that same family (spec.md §4.H / §8 scenario
    /// 3). Returns `None` once the queue is empty. Repeated calls drain
    /// the queue one family/attribute-group at a time.
    pub fn drain(&mut self, addpath: bool, msg_budget: usize) -> Option<UpdateMsg> {
        if self.pending.is_empty() {
            return None;
        }

        let announce_family =
            self.pending.iter().find(|(_, c)| c.action() == Action::Announce).map(|(k, _)| k.family);

        let family = match announce_family {
            Some(f) => f,
            // No announces pending anywhere: drain one family's worth of
            // withdraws so the queue eventually empties even under a
            // withdraw-only workload.
            None => self.pending.keys().next()?.family,
        };

        let target_attrs = announce_family.and_then(|_| {
            self.pending
                .iter()
                .find(|(k, c)| k.family == family && c.action() == Action::Announce)
                .and_then(|(_, c)| match c {
                    Change::Announce(attrs) => Some(attrs.clone()),
                    Change::Withdraw => None,
                })
        });

        let mut drained = Vec::new();
        let mut reachable = Vec::new();
        let mut withdrawn = Vec::new();
        // Conservative fixed overhead for the UPDATE header fields
        // (withdrawn-len + attr-len + message header) left to the caller
        // to size the budget around; here we just track NLRI bytes.
        let mut used = 0usize;

        if let Some(attrs) = &target_attrs {
            for (key, change) in self.pending.iter() {
                if key.family != family || change.action() != Action::Announce {
                    continue;
                }
                if !matches!(change, Change::Announce(a) if a == attrs) {
                    continue;
                }
                let nlri = Nlri {
                    family,
                    action: Action::Announce,
                    path_id: key.path_id,
                    data: key.data.clone(),
                };
                let len = nlri_len(&nlri, addpath);
                if used + len > msg_budget && !reachable.is_empty() {
                    break;
                }
                used += len;
                reachable.push(nlri);
                drained.push(key.clone());
            }
        }

        for (key, change) in self.pending.iter() {
            if key.family != family || change.action() != Action::Withdraw {
                continue;
            }
            let nlri = Nlri {
                family,
                action: Action::Withdraw,
                path_id: key.path_id,
                data: key.data.clone(),
            };
            let len = nlri_len(&nlri, addpath);
            if used + len > msg_budget && !withdrawn.is_empty() {
                break;
            }
            used += len;
            withdrawn.push(nlri);
            drained.push(key.clone());
        }

        if drained.is_empty() {
            return None;
        }
        self.remove_all(drained);

        if family == Family::IPV4_UNICAST {
            let attrs = target_attrs.unwrap_or_default();
            Some(UpdateMsg { withdrawn, attrs, reachable })
        } else {
            let mut attrs = target_attrs.unwrap_or_default();
            if !reachable.is_empty() {
                let nexthop = attrs
                    .mp_reach
                    .take()
                    .map(|mp| mp.nexthop)
                    .unwrap_or_default();
                attrs.mp_reach = Some(MpReachNlri { family, nexthop, nlri: reachable });
            }
            if !withdrawn.is_empty() {
                attrs.mp_unreach = Some(MpUnreachNlri { family, nlri: withdrawn });
            }
            Some(UpdateMsg { withdrawn: vec![], attrs, reachable: vec![] })
        }
    }
}

/// One inbound route as last seen from the peer (spec.md §4.H).
#[derive(Clone, Debug)]
pub struct RibInEntry {
    pub attrs: Attributes,
    /// Set on receipt of the peer's graceful-restart flag; cleared on
    /// End-of-RIB for the entry's family or on stale-routes timer expiry
    /// (spec.md §4.G "Stale-routes timer").
    pub stale: bool,
}

/// Per-peer inbound snapshot (spec.md §4.H): last-seen `Change` per route
/// identity, used for graceful-restart bookkeeping and to give JSON
/// events (spec.md §4.I) a stable view of what the peer last announced.
#[derive(Default)]
pub struct AdjRibIn {
    entries: BTreeMap<NlriKey, RibInEntry>,
}

impl AdjRibIn {
    pub fn new() -> AdjRibIn {
        AdjRibIn::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &NlriKey) -> Option<&RibInEntry> {
        self.entries.get(key)
    }

    pub fn update(&mut self, key: NlriKey, attrs: Attributes) {
        self.entries.insert(key, RibInEntry { attrs, stale: false });
    }

    pub fn withdraw(&mut self, key: &NlriKey) -> Option<RibInEntry> {
        self.entries.remove(key)
    }

    /// Marks every entry of `family` stale, on receipt of the peer's
    /// restart flag at session re-establishment (spec.md §4.G).
    pub fn mark_family_stale(&mut self, family: Family) {
        for (key, entry) in self.entries.iter_mut() {
            if key.family == family {
                entry.stale = true;
            }
        }
    }

    /// Removes every stale entry of `family`, returning their keys so the
    /// caller can emit withdraw events for them. Called on End-of-RIB for
    /// the family or on stale-routes timer expiry (spec.md §8 scenario
    /// 6).
    pub fn clear_stale(&mut self, family: Family) -> Vec<NlriKey> {
        let stale: Vec<NlriKey> = self
            .entries
            .iter()
            .filter(|(key, entry)| key.family == family && entry.stale)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.entries.remove(key);
        }
        stale
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NlriKey, &RibInEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::nlri::NlriData;
    use ipnetwork::Ipv4Network;

    fn key(prefix: &str) -> NlriKey {
        NlriKey {
            family: Family::IPV4_UNICAST,
            path_id: None,
            data: NlriData::Ipv4Unicast(prefix.parse::<Ipv4Network>().unwrap()),
        }
    }

    fn attrs_with_med(med: u32) -> Attributes {
        Attributes { med: Some(med), ..Attributes::default() }
    }

    #[test]
    fn overwrite_idempotence() {
        let mut rib = AdjRibOut::new();
        let k = key("10.0.0.0/24");
        rib.add(k.clone(), Change::Announce(attrs_with_med(1)));
        rib.add(k.clone(), Change::Withdraw);
        rib.add(k.clone(), Change::Announce(attrs_with_med(2)));

        let update = rib.drain(false, 65535).unwrap();
        assert_eq!(update.reachable.len(), 1);
        assert!(update.withdrawn.is_empty());
        assert_eq!(update.attrs.med, Some(2));
        assert!(rib.is_empty());
    }

    #[test]
    fn withdraw_before_announce_grouping_ending_in_announce() {
        let mut rib = AdjRibOut::new();
        let a = key("10.0.0.0/24");
        let b = key("10.0.1.0/24");

        rib.add(a.clone(), Change::Announce(attrs_with_med(10)));
        rib.add(a.clone(), Change::Withdraw);
        rib.add(a.clone(), Change::Announce(attrs_with_med(20)));
        rib.add(b.clone(), Change::Announce(attrs_with_med(20)));

        let update = rib.drain(false, 65535).unwrap();
        assert!(update.withdrawn.is_empty());
        assert_eq!(update.reachable.len(), 2);
        assert_eq!(update.attrs.med, Some(20));
    }

    #[test]
    fn withdraw_before_announce_grouping_ending_in_withdraw() {
        let mut rib = AdjRibOut::new();
        let a = key("10.0.0.0/24");
        let b = key("10.0.1.0/24");

        rib.add(a.clone(), Change::Announce(attrs_with_med(10)));
        rib.add(a.clone(), Change::Withdraw);
        rib.add(a.clone(), Change::Announce(attrs_with_med(20)));
        rib.add(a.clone(), Change::Withdraw);
        rib.add(b.clone(), Change::Announce(attrs_with_med(20)));

        let update = rib.drain(false, 65535).unwrap();
        assert_eq!(update.reachable.len(), 1);
        assert_eq!(update.withdrawn.len(), 1);
        assert!(matches!(&update.withdrawn[0].data, NlriData::Ipv4Unicast(n) if n.to_string() == "10.0.0.0/24"));
    }

    #[test]
    fn stale_sweep_clears_only_marked_family() {
        let mut rib = AdjRibIn::new();
        let a = key("10.0.0.0/24");
        rib.update(a.clone(), Attributes::default());
        rib.mark_family_stale(Family::IPV4_UNICAST);
        assert!(rib.get(&a).unwrap().stale);

        let cleared = rib.clear_stale(Family::IPV4_UNICAST);
        assert_eq!(cleared, vec![a.clone()]);
        assert!(rib.get(&a).is_none());
    }

    #[test]
    fn clear_drops_everything_pending() {
        let mut rib = AdjRibOut::new();
        rib.add(key("10.0.0.0/24"), Change::Announce(Attributes::default()));
        rib.add(key("10.0.1.0/24"), Change::Announce(Attributes::default()));
        assert_eq!(rib.clear(), 2);
        assert!(rib.is_empty());
    }
}
