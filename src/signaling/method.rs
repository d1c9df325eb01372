//! Signaling method definitions.
//!
//! The control connection speaks JSON-RPC 2.0 with Verto method names.
//! Only a handful of methods carry meaning for the client; everything else
//! decodes as [`Method::Unknown`] and is passed through untouched.

use std::fmt;

/// Methods exchanged over the signaling connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// Client login request (token or user/password).
    Login,

    /// Server notification that the logged-in client may place calls.
    ClientReady,

    /// Call offer. Sent by the client for outbound calls, received for inbound ones.
    /// Carries the offering session description.
    Invite,

    /// Call answer. Carries the answering session description.
    Answer,

    /// Early media (ringback) description for an outbound call.
    /// No state change, the remote description is attached only.
    Media,

    /// Remote side is alerting.
    Ringing,

    /// Call teardown. Either side may send it at any time.
    Bye,

    /// In-call modification (hold/unhold).
    Modify,

    /// In-call information (DTMF).
    Info,

    /// Server keepalive probe.
    Ping,

    /// Any method this client does not interpret.
    Unknown(String),
}

impl Method {
    /// Get the method name used on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Login => "login",
            Self::ClientReady => "verto.clientReady",
            Self::Invite => "verto.invite",
            Self::Answer => "verto.answer",
            Self::Media => "verto.media",
            Self::Ringing => "verto.ringing",
            Self::Bye => "verto.bye",
            Self::Modify => "verto.modify",
            Self::Info => "verto.info",
            Self::Ping => "verto.ping",
            Self::Unknown(name) => name,
        }
    }

    /// Parse from the wire name. Never fails: unrecognized names become `Unknown`.
    pub fn from_wire(name: &str) -> Self {
        match name {
            "login" => Self::Login,
            "verto.clientReady" => Self::ClientReady,
            "verto.invite" => Self::Invite,
            "verto.answer" => Self::Answer,
            "verto.media" => Self::Media,
            "verto.ringing" => Self::Ringing,
            "verto.bye" => Self::Bye,
            "verto.modify" => Self::Modify,
            "verto.info" => Self::Info,
            "verto.ping" => Self::Ping,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Whether this method is addressed to a single call via `callID`.
    pub fn is_call_method(&self) -> bool {
        matches!(
            self,
            Self::Invite | Self::Answer | Self::Media | Self::Ringing | Self::Bye
        )
    }

    /// Whether a server-originated request with this method is answered with a result.
    pub fn requires_ack(&self) -> bool {
        self.is_call_method() || matches!(self, Self::Ping)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        Self::from_wire(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_methods_roundtrip_through_wire_names() {
        let known = [
            Method::Login,
            Method::ClientReady,
            Method::Invite,
            Method::Answer,
            Method::Media,
            Method::Ringing,
            Method::Bye,
            Method::Modify,
            Method::Info,
            Method::Ping,
        ];
        for method in known {
            assert_eq!(Method::from_wire(method.as_str()), method);
        }
    }

    #[test]
    fn test_unknown_method_is_preserved() {
        let method = Method::from_wire("verto.punt");
        assert!(method.is_unknown());
        assert_eq!(method.as_str(), "verto.punt");
        assert!(!method.requires_ack());
    }

    #[test]
    fn test_ack_policy() {
        assert!(Method::Invite.requires_ack());
        assert!(Method::Bye.requires_ack());
        assert!(Method::Ping.requires_ack());
        assert!(!Method::ClientReady.requires_ack());
        assert!(!Method::Login.requires_ack());
    }

    #[test]
    fn test_method_names_are_case_sensitive() {
        assert!(Method::from_wire("VERTO.INVITE").is_unknown());
    }
}
