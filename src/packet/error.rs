//
// Wire decoding errors. Grounded in holo-bgp's packet/error.rs; the
// `Notifiable` impl is new — it carries each error's own (code, subcode)
// so the peer FSM (fsm.rs) never has to re-derive it (spec.md §4.C/§4.D).
//

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

use crate::packet::consts::{
    ErrorCode, FsmErrorSubcode, MessageHeaderErrorSubcode,
    OpenMessageErrorSubcode, RouteRefreshErrorSubcode,
    UpdateMessageErrorSubcode,
};
use crate::packet::message::NotificationMsg;

/// Any failure that can occur while decoding bytes off the wire
/// (spec.md §7, kind 1: EncodingError).
#[derive(Debug, Deserialize, Serialize)]
pub enum DecodeError {
    ReadOutOfBounds,
    MessageHeader(MessageHeaderError),
    OpenMessage(OpenMessageError),
    UpdateMessage(UpdateMessageError),
    RouteRefresh(RouteRefreshError),
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum MessageHeaderError {
    ConnectionNotSynchronized,
    BadMessageLength(u16),
    BadMessageType(u8),
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum OpenMessageError {
    UnsupportedVersion(u8),
    BadPeerAs,
    BadBgpIdentifier,
    UnsupportedOptParam,
    UnacceptableHoldTime,
    UnsupportedCapability,
    MalformedOptParam,
}

/// UPDATE message errors. Many of RFC 4271's original hard-reset cases were
/// downgraded to treat-as-withdraw by RFC 7606; only the ones that remain
/// session-fatal live here (spec.md §4.C step 4/5).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum UpdateMessageError {
    MalformedAttributeList,
    InvalidNetworkField,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum RouteRefreshError {
    InvalidMessageLength,
}

/// Outcome of decoding a single path attribute (spec.md §4.C step 5 and
/// §7 kinds 2/3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttrError {
    /// RFC 7606: drop this attribute, keep parsing, and (if the UPDATE
    /// carries reachable NLRI) convert them all to withdraws.
    TreatAsWithdraw,
    /// Session-fatal: stop parsing, send the given NOTIFICATION.
    SessionReset(UpdateMessageError),
}

impl From<TryGetError> for DecodeError {
    fn from(_: TryGetError) -> DecodeError {
        DecodeError::ReadOutOfBounds
    }
}

impl From<MessageHeaderError> for DecodeError {
    fn from(e: MessageHeaderError) -> DecodeError {
        DecodeError::MessageHeader(e)
    }
}

impl From<OpenMessageError> for DecodeError {
    fn from(e: OpenMessageError) -> DecodeError {
        DecodeError::OpenMessage(e)
    }
}

impl From<UpdateMessageError> for DecodeError {
    fn from(e: UpdateMessageError) -> DecodeError {
        DecodeError::UpdateMessage(e)
    }
}

impl From<RouteRefreshError> for DecodeError {
    fn from(e: RouteRefreshError) -> DecodeError {
        DecodeError::RouteRefresh(e)
    }
}

/// Maps a decode error onto the NOTIFICATION the RFCs mandate for it.
pub trait Notifiable {
    fn notification(&self) -> NotificationMsg;
}

impl Notifiable for DecodeError {
    fn notification(&self) -> NotificationMsg {
        match self {
            DecodeError::ReadOutOfBounds => NotificationMsg::new(
                ErrorCode::MessageHeaderError as u8,
                MessageHeaderErrorSubcode::BadMessageLength as u8,
                vec![],
            ),
            DecodeError::MessageHeader(e) => e.notification(),
            DecodeError::OpenMessage(e) => e.notification(),
            DecodeError::UpdateMessage(e) => e.notification(),
            DecodeError::RouteRefresh(e) => e.notification(),
        }
    }
}

impl Notifiable for MessageHeaderError {
    fn notification(&self) -> NotificationMsg {
        let (subcode, data) = match self {
            MessageHeaderError::ConnectionNotSynchronized => {
                (MessageHeaderErrorSubcode::ConnectionNotSynchronized, vec![])
            }
            MessageHeaderError::BadMessageLength(len) => (
                MessageHeaderErrorSubcode::BadMessageLength,
                len.to_be_bytes().to_vec(),
            ),
            MessageHeaderError::BadMessageType(t) => {
                (MessageHeaderErrorSubcode::BadMessageType, vec![*t])
            }
        };
        NotificationMsg::new(ErrorCode::MessageHeaderError as u8, subcode as u8, data)
    }
}

impl Notifiable for OpenMessageError {
    fn notification(&self) -> NotificationMsg {
        let subcode = match self {
            OpenMessageError::UnsupportedVersion(_) => {
                OpenMessageErrorSubcode::UnsupportedVersionNumber
            }
            OpenMessageError::BadPeerAs => OpenMessageErrorSubcode::BadPeerAs,
            OpenMessageError::BadBgpIdentifier => {
                OpenMessageErrorSubcode::BadBgpIdentifier
            }
            OpenMessageError::UnsupportedOptParam => {
                OpenMessageErrorSubcode::UnsupportedOptParam
            }
            OpenMessageError::UnacceptableHoldTime => {
                OpenMessageErrorSubcode::UnacceptableHoldTime
            }
            OpenMessageError::UnsupportedCapability => {
                OpenMessageErrorSubcode::UnsupportedCapability
            }
            OpenMessageError::MalformedOptParam => {
                OpenMessageErrorSubcode::UnsupportedOptParam
            }
        };
        NotificationMsg::new(ErrorCode::OpenMessageError as u8, subcode as u8, vec![])
    }
}

impl Notifiable for UpdateMessageError {
    fn notification(&self) -> NotificationMsg {
        let subcode = match self {
            UpdateMessageError::MalformedAttributeList => {
                UpdateMessageErrorSubcode::MalformedAttributeList
            }
            UpdateMessageError::InvalidNetworkField => {
                UpdateMessageErrorSubcode::InvalidNetworkField
            }
        };
        NotificationMsg::new(ErrorCode::UpdateMessageError as u8, subcode as u8, vec![])
    }
}

impl Notifiable for RouteRefreshError {
    fn notification(&self) -> NotificationMsg {
        let subcode = match self {
            RouteRefreshError::InvalidMessageLength => {
                RouteRefreshErrorSubcode::InvalidMessageLength
            }
        };
        NotificationMsg::new(
            ErrorCode::RouteRefreshMessageError as u8,
            subcode as u8,
            vec![],
        )
    }
}

/// NOTIFICATION for "unexpected message in state X" (spec.md §4.G).
pub fn fsm_error(subcode: FsmErrorSubcode) -> NotificationMsg {
    NotificationMsg::new(ErrorCode::FiniteStateMachineError as u8, subcode as u8, vec![])
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ReadOutOfBounds => write!(f, "attempt to read out of bounds"),
            DecodeError::MessageHeader(e) => write!(f, "message header error: {e:?}"),
            DecodeError::OpenMessage(e) => write!(f, "OPEN message error: {e:?}"),
            DecodeError::UpdateMessage(e) => write!(f, "UPDATE message error: {e:?}"),
            DecodeError::RouteRefresh(e) => write!(f, "ROUTE-REFRESH error: {e:?}"),
        }
    }
}

impl std::error::Error for DecodeError {}
