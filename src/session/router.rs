//! Inbound envelope routing.

use super::{Registry, Session};
use crate::calls::{Call, CallId, PeerInfo, ack};
use crate::media::SessionDescription;
use crate::signaling::{Envelope, ErrorResponse, Method, Request, Response};
use crate::types::events::{ClientError, Event, IncomingCall};
use log::{debug, info, trace, warn};

impl Session {
    /// Handle one inbound text frame. Malformed frames are logged and dropped.
    pub(crate) async fn handle_message(&self, raw: &str) {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(target: "Session", "Dropping malformed frame: {e}");
                return;
            }
        };

        match envelope {
            Envelope::Result(response) => self.handle_result(response).await,
            Envelope::Error(error) => self.handle_error(error),
            Envelope::Request(request) => self.handle_request(request).await,
        }
    }

    async fn handle_result(&self, response: Response) {
        let answered = self.outbox.take_pending(response.id.as_ref());

        let Some(sessid) = response.session_id() else {
            if answered == Some(Method::Login) {
                warn!(target: "Session", "Login result carried no session id");
            } else {
                trace!(
                    target: "Session",
                    "Result for {}",
                    answered.as_ref().map_or("unknown request", Method::as_str)
                );
            }
            return;
        };

        let mut current = self.session_id.write().await;
        if let Some(existing) = current.as_deref() {
            if existing != sessid {
                warn!(
                    target: "Session",
                    "Ignoring session id {sessid}, already logged in as {existing}"
                );
            }
            return;
        }
        *current = Some(sessid.to_string());
        drop(current);

        info!(target: "Session", "Logged in, session id {sessid}");
        self.event_bus
            .dispatch(&Event::SessionIdUpdated(sessid.to_string()));
    }

    fn handle_error(&self, error: ErrorResponse) {
        let answered = self.outbox.take_pending(error.id.as_ref());
        warn!(
            target: "Session",
            "Server error for {}: {}",
            answered.as_ref().map_or("unknown request", Method::as_str),
            error.error
        );
        self.event_bus
            .dispatch(&Event::ClientError(ClientError::Server {
                code: error.error.code,
                message: error.error.message,
                request: answered.map(|m| m.as_str().to_string()),
            }));
    }

    async fn handle_request(&self, request: Request) {
        if request.method.requires_ack() {
            if let Some(id) = request.id.clone() {
                self.outbox.respond(ack(id, &request.method));
            }
        }

        match &request.method {
            Method::ClientReady => {
                info!(target: "Session", "Server reports client ready");
                self.event_bus.dispatch(&Event::ClientReady);
            }
            Method::Ping => trace!(target: "Session", "Ping"),
            method if method.is_call_method() => self.route_call_request(&request).await,
            other => debug!(target: "Session", "Ignoring {other} from server"),
        }
    }

    async fn route_call_request(&self, request: &Request) {
        let Some(call_id) = request.call_params().call_id().map(CallId::from) else {
            debug!(target: "Session", "{} without callID, dropping", request.method);
            return;
        };

        let mut calls = self.calls.lock().await;
        if let Some(call) = calls.get_mut(&call_id) {
            call.handle(request).await;
            self.publish_changes(&mut calls, &call_id);
        } else if request.method == Method::Invite {
            self.accept_incoming(&mut calls, call_id, request).await;
        } else {
            debug!(
                target: "Session",
                "No call {} for {}, dropping",
                call_id, request.method
            );
        }
    }

    async fn accept_incoming(&self, calls: &mut Registry, call_id: CallId, request: &Request) {
        let Some(session_id) = self.get_session_id().await else {
            warn!(target: "Session", "Invite for call {call_id} before login completed, dropping");
            return;
        };
        let params = request.call_params();
        let peer = PeerInfo::new(
            params.caller_id_name().unwrap_or_default(),
            params.caller_id_number().unwrap_or_default(),
            params.callee_id_number().unwrap_or_default(),
        );
        let offer = params.sdp().map(SessionDescription::offer);
        let has_offer = offer.is_some();
        if !has_offer {
            warn!(target: "Session", "Invite for call {call_id} carried no offer");
        }

        let mut call = Call::new_inbound(
            call_id.clone(),
            session_id,
            peer.clone(),
            offer,
            self.link.clone(),
        );
        if let Err(e) = call.start() {
            warn!(target: "Session", "Could not start incoming call {call_id}: {e}");
            return;
        }

        info!(
            target: "Session",
            "Incoming call {} from {} <{}>",
            call_id, peer.caller_name, peer.caller_number
        );
        calls.insert(call_id.clone(), call);
        self.publish_changes(calls, &call_id);
        self.event_bus.dispatch(&Event::IncomingCall(IncomingCall {
            call_id,
            peer,
            has_offer,
        }));
    }
}
