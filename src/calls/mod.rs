//! Call signaling module.
//!
//! Each [`Call`] owns its state machine and its [`NegotiationWindow`]. Calls
//! live inside the session's registry and are only driven from the session's
//! serialized control sequence.
//!
//! # Architecture
//!
//! - [`CallState`] & [`CallTransition`]: call lifecycle
//! - [`NegotiationWindow`]: candidate debounce deciding when to send a description
//! - [`CallMessageBuilder`]: outbound call envelopes (invite, answer, bye, modify, info)
//! - [`Call`]: per-call protocol handling and media driving

mod call;
mod error;
mod messages;
pub mod negotiation;
mod state;

pub use call::{Call, CallStateChanged};
pub(crate) use call::{CallLink, LocalDescriptionResult};
pub use error::CallError;
pub use messages::{CallMessageBuilder, HangupCause, ack};
pub use negotiation::{NegotiationReady, NegotiationSignal, NegotiationWindow};
pub use state::{CallState, CallTransition, EndReason, InvalidTransition, next_state};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Opaque call identifier. Caller-supplied for outbound calls, server-supplied for inbound.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier for an outbound call.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    Outbound,
    Inbound,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => f.write_str("outbound"),
            Self::Inbound => f.write_str("inbound"),
        }
    }
}

/// Who is calling whom.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerInfo {
    pub caller_name: String,
    pub caller_number: String,
    pub destination_number: String,
}

impl PeerInfo {
    pub fn new(
        caller_name: impl Into<String>,
        caller_number: impl Into<String>,
        destination_number: impl Into<String>,
    ) -> Self {
        Self {
            caller_name: caller_name.into(),
            caller_number: caller_number.into(),
            destination_number: destination_number.into(),
        }
    }
}

/// Options for a call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOptions {
    /// Identifier to use for an outbound call. Generated when `None`.
    pub call_id: Option<CallId>,
    pub audio: bool,
    pub video: bool,
    pub attach: bool,
    pub use_stereo: bool,
    pub screen_share: bool,
    /// Sent as `userVariables` inside `dialogParams`.
    pub custom_variables: Map<String, Value>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            call_id: None,
            audio: true,
            video: false,
            attach: false,
            use_stereo: false,
            screen_share: false,
            custom_variables: Map::new(),
        }
    }
}

impl CallOptions {
    pub fn audio() -> Self {
        Self::default()
    }

    pub fn video() -> Self {
        Self {
            video: true,
            ..Default::default()
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<CallId>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn constraints(&self) -> crate::media::MediaConstraints {
        crate::media::MediaConstraints {
            audio: self.audio,
            video: self.video,
            use_stereo: self.use_stereo,
            screen_share: self.screen_share,
        }
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
