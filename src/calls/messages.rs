//! Outbound call envelopes.
//!
//! Every call request carries `sessid`, `callID` and a `dialogParams` object
//! describing the call; method-specific fields are layered on top.

use super::{CallDirection, CallId, CallOptions, PeerInfo};
use crate::signaling::{Method, Params, RequestId, Response};
use serde_json::{Value, json};

/// Hangup cause sent with a BYE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HangupCause {
    NormalClearing,
    UserBusy,
}

impl HangupCause {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NormalClearing => "NORMAL_CLEARING",
            Self::UserBusy => "USER_BUSY",
        }
    }

    pub const fn code(&self) -> i64 {
        match self {
            Self::NormalClearing => 16,
            Self::UserBusy => 17,
        }
    }
}

/// Builder for outgoing call requests.
#[derive(Debug, Clone)]
pub struct CallMessageBuilder<'a> {
    method: Method,
    session_id: &'a str,
    call_id: &'a CallId,
    direction: CallDirection,
    peer: &'a PeerInfo,
    options: &'a CallOptions,
    sdp: Option<&'a str>,
    cause: Option<HangupCause>,
    action: Option<&'static str>,
    dtmf: Option<&'a str>,
}

impl<'a> CallMessageBuilder<'a> {
    pub fn new(
        method: Method,
        session_id: &'a str,
        call_id: &'a CallId,
        direction: CallDirection,
        peer: &'a PeerInfo,
        options: &'a CallOptions,
    ) -> Self {
        Self {
            method,
            session_id,
            call_id,
            direction,
            peer,
            options,
            sdp: None,
            cause: None,
            action: None,
            dtmf: None,
        }
    }

    pub fn sdp(mut self, sdp: &'a str) -> Self {
        self.sdp = Some(sdp);
        self
    }

    pub fn cause(mut self, cause: HangupCause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// `verto.modify` action, e.g. `hold`.
    pub fn action(mut self, action: &'static str) -> Self {
        self.action = Some(action);
        self
    }

    pub fn dtmf(mut self, digits: &'a str) -> Self {
        self.dtmf = Some(digits);
        self
    }

    fn dialog_params(&self) -> Value {
        let mut dialog = json!({
            "callID": self.call_id.as_str(),
            "destination_number": self.peer.destination_number,
            "caller_id_name": self.peer.caller_name,
            "caller_id_number": self.peer.caller_number,
            "audio": self.options.audio,
            "video": self.options.video,
            "attach": self.options.attach,
            "useStereo": self.options.use_stereo,
            "screenShare": self.options.screen_share,
            "userVariables": Value::Object(self.options.custom_variables.clone()),
        });
        if self.direction == CallDirection::Inbound {
            // Answering side echoes the remote identity the server gave us.
            dialog["remote_caller_id_name"] = Value::from(self.peer.caller_name.as_str());
            dialog["remote_caller_id_number"] = Value::from(self.peer.caller_number.as_str());
        }
        dialog
    }

    /// The method and params of the request. The outbox assigns the id.
    pub fn build(self) -> (Method, Params) {
        let mut params = Params::new();
        params.insert("sessid".into(), Value::from(self.session_id));
        params.insert("callID".into(), Value::from(self.call_id.as_str()));
        params.insert("dialogParams".into(), self.dialog_params());
        if let Some(sdp) = self.sdp {
            params.insert("sdp".into(), Value::from(sdp));
        }
        if let Some(cause) = self.cause {
            params.insert("cause".into(), Value::from(cause.name()));
            params.insert("causeCode".into(), Value::from(cause.code()));
        }
        if let Some(action) = self.action {
            params.insert("action".into(), Value::from(action));
        }
        if let Some(dtmf) = self.dtmf {
            params.insert("dtmf".into(), Value::from(dtmf));
        }
        (self.method, params)
    }
}

/// Result acknowledging a server request.
pub fn ack(id: RequestId, method: &Method) -> Response {
    Response {
        id: Some(id),
        result: json!({ "method": method.as_str() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{Envelope, Request};

    fn peer() -> PeerInfo {
        PeerInfo::new("A", "123", "sip:b@x")
    }

    #[test]
    fn test_invite_carries_sdp_and_dialog_params() {
        let call_id = CallId::new("U1");
        let peer = peer();
        let mut options = CallOptions::audio();
        options
            .custom_variables
            .insert("account".into(), Value::from("42"));

        let (method, params) = CallMessageBuilder::new(
            Method::Invite,
            "S1",
            &call_id,
            CallDirection::Outbound,
            &peer,
            &options,
        )
        .sdp("v=0")
        .build();

        assert_eq!(method, Method::Invite);
        assert_eq!(params["sessid"], "S1");
        assert_eq!(params["callID"], "U1");
        assert_eq!(params["sdp"], "v=0");
        let dialog = &params["dialogParams"];
        assert_eq!(dialog["callID"], "U1");
        assert_eq!(dialog["destination_number"], "sip:b@x");
        assert_eq!(dialog["caller_id_name"], "A");
        assert_eq!(dialog["caller_id_number"], "123");
        assert_eq!(dialog["audio"], true);
        assert_eq!(dialog["video"], false);
        assert_eq!(dialog["userVariables"]["account"], "42");
        assert!(dialog.get("remote_caller_id_name").is_none());
    }

    #[test]
    fn test_bye_carries_cause() {
        let call_id = CallId::new("U1");
        let peer = peer();
        let options = CallOptions::default();
        let (method, params) = CallMessageBuilder::new(
            Method::Bye,
            "S1",
            &call_id,
            CallDirection::Inbound,
            &peer,
            &options,
        )
        .cause(HangupCause::UserBusy)
        .build();

        assert_eq!(method, Method::Bye);
        assert_eq!(params["cause"], "USER_BUSY");
        assert_eq!(params["causeCode"], 17);
        assert!(params.get("sdp").is_none());
        assert_eq!(params["dialogParams"]["remote_caller_id_name"], "A");
    }

    #[test]
    fn test_built_params_decode_back_to_call_params() {
        let call_id = CallId::new("U7");
        let peer = peer();
        let options = CallOptions::default();
        let (method, params) = CallMessageBuilder::new(
            Method::Modify,
            "S1",
            &call_id,
            CallDirection::Outbound,
            &peer,
            &options,
        )
        .action("hold")
        .build();

        let text = Envelope::from(Request::new(3u64, method, params)).encode();
        let Envelope::Request(req) = Envelope::decode(&text).unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(req.call_params().call_id(), Some("U7"));
        assert_eq!(req.params["action"], "hold");
    }

    #[test]
    fn test_ack_echoes_id_and_method() {
        let response = ack(RequestId::Number(9), &Method::Bye);
        assert_eq!(response.id, Some(RequestId::Number(9)));
        assert_eq!(response.result["method"], "verto.bye");
    }
}
