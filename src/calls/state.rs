//! Call state machine implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Why a call reached [`CallState::Done`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// Local hangup of an established or outbound call.
    LocalHangup,
    /// Local hangup of an inbound call that was never answered.
    Rejected,
    /// Remote BYE, with the cause the server reported.
    RemoteBye {
        cause: Option<String>,
        cause_code: Option<i64>,
    },
    /// The media engine could not produce or apply a description.
    NegotiationFailed(String),
    /// Negotiation never settled before the ceiling expired.
    NegotiationTimeout,
    /// The owning session was disconnected.
    SessionClosed,
}

/// Current state of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub enum CallState {
    /// Created, negotiation not started.
    #[default]
    New,
    /// Negotiating: local description being produced, or offer sent and waiting.
    Connecting,
    /// Outbound only: remote side is alerting.
    Ringing,
    /// Media established.
    Active { connected_at: DateTime<Utc> },
    /// Established call put on hold locally.
    Held {
        held_at: DateTime<Utc>,
        connected_at: DateTime<Utc>,
    },
    /// Terminal.
    Done {
        reason: EndReason,
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    },
}

impl CallState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_held(&self) -> bool {
        matches!(self, Self::Held { .. })
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// Whether the call has not been established yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::New | Self::Connecting | Self::Ringing)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Connecting => "CONNECTING",
            Self::Ringing => "RINGING",
            Self::Active { .. } => "ACTIVE",
            Self::Held { .. } => "HELD",
            Self::Done { .. } => "DONE",
        }
    }

    fn connected_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Active { connected_at } | Self::Held { connected_at, .. } => Some(*connected_at),
            _ => None,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State transitions for calls.
#[derive(Debug, Clone)]
pub enum CallTransition {
    /// Negotiation kicked off (outbound dial, or inbound invite accepted).
    Start,
    RemoteRinging,
    RemoteAnswered,
    /// Inbound answer negotiated and sent.
    LocalAnswered,
    Hold,
    Resume,
    End { reason: EndReason },
}

/// Apply a transition to a state. Pure: returns the next state or an error.
pub fn next_state(
    current: &CallState,
    transition: CallTransition,
) -> Result<CallState, InvalidTransition> {
    let next = match (current, transition) {
        (CallState::Done { .. }, transition) => {
            return Err(InvalidTransition::new(current, &transition));
        }
        (_, CallTransition::End { reason }) => CallState::Done {
            reason,
            ended_at: Utc::now(),
            duration_secs: current
                .connected_at()
                .map(|at| Utc::now().signed_duration_since(at).num_seconds()),
        },
        (CallState::New, CallTransition::Start) => CallState::Connecting,
        (CallState::Connecting, CallTransition::RemoteRinging) => CallState::Ringing,
        (
            CallState::Connecting | CallState::Ringing,
            CallTransition::RemoteAnswered | CallTransition::LocalAnswered,
        ) => CallState::Active {
            connected_at: Utc::now(),
        },
        (CallState::Active { connected_at }, CallTransition::Hold) => CallState::Held {
            held_at: Utc::now(),
            connected_at: *connected_at,
        },
        (CallState::Held { connected_at, .. }, CallTransition::Resume) => CallState::Active {
            connected_at: *connected_at,
        },
        (current, transition) => return Err(InvalidTransition::new(current, &transition)),
    };
    Ok(next)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl InvalidTransition {
    fn new(current: &CallState, attempted: &CallTransition) -> Self {
        Self {
            current_state: current.name().to_string(),
            attempted: format!("{:?}", attempted),
        }
    }
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
