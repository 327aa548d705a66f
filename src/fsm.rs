//
// The BGP peer state machine (spec.md §4.G). Grounded in holo-bgp's
// `neighbor::fsm` module: the same six RFC 4271 states and the same
// event-driven transition shape, rewritten against this crate's own
// `Peer`/`Connection`/`rib` types instead of holo's generic `AddressFamily`
// parameter and ibus-routed northbound notifications.
//

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// RFC 4271 §8's session states, in their defined order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum State {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
}

/// Per-peer timers (spec.md §4.G). Each variant names the timer whose
/// firing is being reported, so one `Debug::FsmTransition` log line
/// covers every kind of timer expiry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum Timer {
    ConnectRetry,
    Hold,
    Keepalive,
    StaleRoutes,
}

/// Everything that can drive a state transition.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum Event {
    AdminStart,
    AdminStop,
    ConnectRetryExpires,
    TcpConnectionConfirmed,
    TcpConnectionFails,
    TcpConnectionClosed,
    BgpOpenValid,
    BgpOpenInvalid,
    BgpHeaderErr,
    KeepaliveReceived,
    HoldTimerExpires,
    NotificationReceived,
    NotificationSent,
}

/// Default initial hold time while awaiting the peer's OPEN (spec.md
/// §4.G: "a short hold (default 4 min) awaiting peer OPEN").
pub const OPEN_SENT_HOLD_TIME: Duration = Duration::from_secs(240);

/// Cap for the ConnectRetry exponential backoff (spec.md §4.G).
pub const CONNECT_RETRY_MAX: Duration = Duration::from_secs(120);

impl State {
    /// Whether a connection object should exist in this state. Used by
    /// `peer.rs` to decide whether to tear one down on a transition.
    pub fn has_connection(self) -> bool {
        !matches!(self, State::Idle | State::Active)
    }

    pub fn is_established(self) -> bool {
        matches!(self, State::Established)
    }
}

/// Pure transition table (spec.md §4.G). Returns the next state reached
/// by applying `event` in `state`; `None` means the event doesn't apply
/// and should be ignored in this state (`Debug::FsmEventIgnored`).
/// Side effects (sending OPEN/KEEPALIVE/NOTIFICATION, starting timers,
/// tearing down the connection) are the caller's responsibility — this
/// function only says what to move to, not what to do getting there.
pub fn next_state(state: State, event: &Event) -> Option<State> {
    use Event::*;
    use State::*;

    match (state, event) {
        (Idle, AdminStart) => Some(Connect),

        (Connect, TcpConnectionConfirmed) => Some(OpenSent),
        (Connect, TcpConnectionFails) => Some(Active),
        (Connect, ConnectRetryExpires) => Some(Connect),
        (Connect, AdminStop) => Some(Idle),

        (Active, TcpConnectionConfirmed) => Some(OpenSent),
        (Active, ConnectRetryExpires) => Some(Connect),
        (Active, AdminStop) => Some(Idle),

        (OpenSent, BgpOpenValid) => Some(OpenConfirm),
        (OpenSent, BgpOpenInvalid) => Some(Idle),
        (OpenSent, BgpHeaderErr) => Some(Idle),
        (OpenSent, TcpConnectionFails) => Some(Active),
        (OpenSent, TcpConnectionClosed) => Some(Active),
        (OpenSent, NotificationSent) => Some(Idle),
        (OpenSent, AdminStop) => Some(Idle),

        (OpenConfirm, KeepaliveReceived) => Some(Established),
        (OpenConfirm, NotificationReceived) => Some(Idle),
        (OpenConfirm, NotificationSent) => Some(Idle),
        (OpenConfirm, HoldTimerExpires) => Some(Idle),
        (OpenConfirm, TcpConnectionFails) => Some(Idle),
        (OpenConfirm, TcpConnectionClosed) => Some(Idle),
        (OpenConfirm, AdminStop) => Some(Idle),

        (Established, NotificationReceived) => Some(Idle),
        (Established, NotificationSent) => Some(Idle),
        (Established, HoldTimerExpires) => Some(Idle),
        (Established, TcpConnectionClosed) => Some(Idle),
        (Established, TcpConnectionFails) => Some(Idle),
        (Established, AdminStop) => Some(Idle),

        _ => None,
    }
}

/// ConnectRetry backoff sequence: doubles each failed attempt, capped at
/// `CONNECT_RETRY_MAX` (spec.md §4.G).
pub fn backoff(attempt: u32, base: Duration) -> Duration {
    let shift = attempt.min(16);
    base.saturating_mul(1u32 << shift).min(CONNECT_RETRY_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_to_established() {
        let mut state = State::Idle;
        for event in [
            Event::AdminStart,
            Event::TcpConnectionConfirmed,
            Event::BgpOpenValid,
            Event::KeepaliveReceived,
        ] {
            state = next_state(state, &event).expect("transition should apply");
        }
        assert_eq!(state, State::Established);
    }

    #[test]
    fn unexpected_event_ignored_in_idle() {
        assert_eq!(next_state(State::Idle, &Event::KeepaliveReceived), None);
    }

    #[test]
    fn established_drops_to_idle_on_any_teardown_cause() {
        for event in [
            Event::NotificationReceived,
            Event::NotificationSent,
            Event::HoldTimerExpires,
            Event::TcpConnectionClosed,
            Event::AdminStop,
        ] {
            assert_eq!(next_state(State::Established, &event), Some(State::Idle));
        }
    }

    #[test]
    fn backoff_caps_at_max() {
        assert_eq!(backoff(0, Duration::from_secs(1)), Duration::from_secs(1));
        assert_eq!(backoff(10, Duration::from_secs(1)), CONNECT_RETRY_MAX);
    }
}
