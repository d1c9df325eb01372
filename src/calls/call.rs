//! Per-call state, protocol handling and media driving.

use super::error::CallError;
use super::messages::{CallMessageBuilder, HangupCause};
use super::negotiation::{NegotiationReady, NegotiationSignal, NegotiationWindow, WindowOutcome};
use super::state::{CallState, CallTransition, EndReason, InvalidTransition, next_state};
use super::{CallDirection, CallId, CallOptions, PeerInfo};
use crate::media::{
    CandidateEvent, CandidateSink, IceCandidate, MediaEngine, MediaError, SessionDescription,
    TrackRole,
};
use crate::session::Outbox;
use crate::signaling::{Method, Request};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const STATE_CHANNEL_CAPACITY: usize = 16;

/// Fired on every transition of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallStateChanged {
    pub call_id: CallId,
    pub state: CallState,
}

/// Result of a spawned local-description request.
#[derive(Debug)]
pub(crate) struct LocalDescriptionResult {
    pub call_id: CallId,
    pub result: Result<SessionDescription, MediaError>,
}

/// Everything a call needs from its session. Cloned into each call.
#[derive(Clone)]
pub(crate) struct CallLink {
    pub media: Arc<dyn MediaEngine>,
    pub outbox: Outbox,
    pub candidates: mpsc::UnboundedSender<CandidateEvent>,
    pub descriptions: mpsc::UnboundedSender<LocalDescriptionResult>,
    pub signals: mpsc::UnboundedSender<NegotiationSignal>,
    pub window: Duration,
    pub ceiling: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
struct TrackMutes {
    audio: bool,
    video: bool,
}

impl TrackMutes {
    fn get(&self, role: TrackRole) -> bool {
        match role {
            TrackRole::Audio => self.audio,
            TrackRole::Video => self.video,
        }
    }

    fn set(&mut self, role: TrackRole, muted: bool) {
        match role {
            TrackRole::Audio => self.audio = muted,
            TrackRole::Video => self.video = muted,
        }
    }
}

pub struct Call {
    id: CallId,
    session_id: String,
    direction: CallDirection,
    peer: PeerInfo,
    options: CallOptions,
    state: CallState,
    created_at: DateTime<Utc>,
    negotiation: NegotiationWindow,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    /// Offer received with an inbound INVITE, consumed by `answer`.
    remote_offer: Option<SessionDescription>,
    /// Set once the server knows about this call (INVITE sent or received).
    server_aware: bool,
    answering: bool,
    early_media: bool,
    mutes: TrackMutes,
    producer: Option<JoinHandle<()>>,
    /// Quiet-period deadline that fired before the local description existed.
    deferred_deadline: Option<NegotiationSignal>,
    state_tx: broadcast::Sender<CallStateChanged>,
    pending_changes: Vec<CallStateChanged>,
    link: CallLink,
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("direction", &self.direction)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("negotiation", &self.negotiation)
            .field("early_media", &self.early_media)
            .finish()
    }
}

impl Call {
    fn new(
        id: CallId,
        session_id: String,
        direction: CallDirection,
        peer: PeerInfo,
        options: CallOptions,
        link: CallLink,
    ) -> Self {
        let negotiation =
            NegotiationWindow::new(id.clone(), link.window, link.ceiling, link.signals.clone());
        Self {
            id,
            session_id,
            direction,
            peer,
            options,
            state: CallState::New,
            created_at: Utc::now(),
            negotiation,
            local_description: None,
            remote_description: None,
            remote_offer: None,
            server_aware: direction == CallDirection::Inbound,
            answering: false,
            early_media: false,
            mutes: TrackMutes::default(),
            producer: None,
            deferred_deadline: None,
            state_tx: broadcast::channel(STATE_CHANNEL_CAPACITY).0,
            pending_changes: Vec::new(),
            link,
        }
    }

    pub(crate) fn new_outbound(
        id: CallId,
        session_id: String,
        peer: PeerInfo,
        options: CallOptions,
        link: CallLink,
    ) -> Self {
        Self::new(id, session_id, CallDirection::Outbound, peer, options, link)
    }

    pub(crate) fn new_inbound(
        id: CallId,
        session_id: String,
        peer: PeerInfo,
        remote_offer: Option<SessionDescription>,
        link: CallLink,
    ) -> Self {
        let mut call = Self::new(
            id,
            session_id,
            CallDirection::Inbound,
            peer,
            CallOptions::default(),
            link,
        );
        call.remote_offer = remote_offer;
        call
    }

    pub fn id(&self) -> &CallId {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn negotiation(&self) -> &NegotiationWindow {
        &self.negotiation
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn has_early_media(&self) -> bool {
        self.early_media
    }

    pub fn is_muted(&self, role: TrackRole) -> bool {
        self.mutes.get(role)
    }

    /// Per-call state-change stream.
    pub fn subscribe(&self) -> broadcast::Receiver<CallStateChanged> {
        self.state_tx.subscribe()
    }

    /// Transitions recorded since the last call, for the session to fan out.
    pub(crate) fn take_state_changes(&mut self) -> Vec<CallStateChanged> {
        std::mem::take(&mut self.pending_changes)
    }

    fn transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let next = next_state(&self.state, transition)?;
        info!(
            target: "Session/Call",
            "Call {} {} -> {}",
            self.id, self.state, next
        );
        self.state = next;
        let change = CallStateChanged {
            call_id: self.id.clone(),
            state: self.state.clone(),
        };
        // No subscribers is fine.
        let _ = self.state_tx.send(change.clone());
        self.pending_changes.push(change);
        Ok(())
    }

    fn message(&self, method: Method) -> CallMessageBuilder<'_> {
        CallMessageBuilder::new(
            method,
            &self.session_id,
            &self.id,
            self.direction,
            &self.peer,
            &self.options,
        )
    }

    fn send(&self, builder: CallMessageBuilder<'_>) {
        let (method, params) = builder.build();
        self.link.outbox.request(method, params);
    }

    /// NEW -> CONNECTING.
    ///
    /// Outbound calls ask the media engine for their offer right away. Inbound
    /// calls only keep the remote offer here; the local answer is requested by
    /// [`Call::answer`], so an unanswered call never touches local media.
    pub(crate) fn start(&mut self) -> Result<(), CallError> {
        self.transition(CallTransition::Start)?;
        if self.direction == CallDirection::Outbound {
            self.begin_negotiation(None);
        }
        Ok(())
    }

    fn begin_negotiation(&mut self, remote_offer: Option<SessionDescription>) {
        let media = self.link.media.clone();
        let descriptions = self.link.descriptions.clone();
        let sink = CandidateSink::new(self.id.clone(), self.link.candidates.clone());
        let call_id = self.id.clone();
        let constraints = self.options.constraints();

        debug!(target: "Session/Call", "Requesting local description for call {}", self.id);
        self.producer = Some(tokio::spawn(async move {
            let result = media
                .produce_local_description(&call_id, constraints, remote_offer, sink)
                .await;
            let _ = descriptions.send(LocalDescriptionResult { call_id, result });
        }));
        self.negotiation.start_ceiling();
    }

    pub(crate) async fn on_local_description(
        &mut self,
        result: Result<SessionDescription, MediaError>,
    ) {
        self.producer = None;
        if self.is_done() {
            return;
        }
        let description = match result {
            Ok(description) => description,
            Err(e) => {
                warn!(target: "Session/Call", "Call {} failed to produce local description: {e}", self.id);
                self.fail_negotiation(EndReason::NegotiationFailed(e.to_string()))
                    .await;
                return;
            }
        };
        if let Err(e) = self
            .link
            .media
            .set_local_description(&self.id, description.clone())
            .await
        {
            warn!(target: "Session/Call", "Call {} failed to apply local description: {e}", self.id);
            self.fail_negotiation(EndReason::NegotiationFailed(e.to_string()))
                .await;
            return;
        }
        self.local_description = Some(description);
        // A still-armed deadline keeps its original expiry. One that already
        // fired is replayed now; the window drops it if a newer candidate re-armed.
        if let Some(signal) = self.deferred_deadline.take() {
            self.on_negotiation_signal(&signal).await;
        }
    }

    pub(crate) fn on_candidate(&mut self, candidate: IceCandidate) {
        if self.is_done() {
            return;
        }
        debug!(target: "Session/Negotiation", "Call {} candidate: {}", self.id, candidate);
        self.negotiation.on_candidate(candidate);
    }

    pub(crate) async fn on_negotiation_signal(&mut self, signal: &NegotiationSignal) {
        if self.is_done() {
            return;
        }
        if self.local_description.is_none()
            && matches!(signal.kind, super::negotiation::SignalKind::Deadline { .. })
        {
            debug!(target: "Session/Negotiation", "Call {} quiet period elapsed before local description", self.id);
            self.deferred_deadline = Some(signal.clone());
            return;
        }
        match self.negotiation.on_signal(signal) {
            WindowOutcome::Ready(ready) => self.on_negotiation_ready(ready).await,
            WindowOutcome::Expired => {
                warn!(target: "Session/Negotiation", "Call {} negotiation did not settle in time", self.id);
                self.fail_negotiation(EndReason::NegotiationTimeout).await;
            }
            WindowOutcome::Nothing => {}
        }
    }

    async fn on_negotiation_ready(&mut self, ready: NegotiationReady) {
        let Some(description) = self
            .link
            .media
            .local_description(&self.id)
            .or_else(|| self.local_description.clone())
        else {
            return;
        };
        debug!(
            target: "Session/Negotiation",
            "Call {} ready after {} candidates (last: {})",
            self.id, ready.candidate_count, ready.last_candidate
        );
        self.local_description = Some(description.clone());

        match self.direction {
            CallDirection::Outbound => {
                self.send(self.message(Method::Invite).sdp(&description.sdp));
                self.server_aware = true;
            }
            CallDirection::Inbound => {
                self.send(self.message(Method::Answer).sdp(&description.sdp));
                if let Err(e) = self.transition(CallTransition::LocalAnswered) {
                    warn!(target: "Session/Call", "Call {} answered in unexpected state: {e}", self.id);
                }
            }
        }
    }

    async fn fail_negotiation(&mut self, reason: EndReason) {
        let cause = self.server_aware.then_some(HangupCause::NormalClearing);
        self.terminate(reason, cause).await;
    }

    /// Protocol dispatch for an envelope addressed to this call.
    pub(crate) async fn handle(&mut self, request: &Request) {
        let params = request.call_params();
        if params.call_id() != Some(self.id.as_str()) {
            debug!(
                target: "Session/Call",
                "Ignoring {} for call {:?} on call {}",
                request.method,
                params.call_id(),
                self.id
            );
            return;
        }

        match &request.method {
            Method::Media => {
                if let Some(sdp) = params.sdp() {
                    self.early_media = true;
                    self.apply_remote(sdp).await;
                }
            }
            Method::Answer => {
                if self.direction != CallDirection::Outbound || !self.state.is_pending() {
                    debug!(target: "Session/Call", "Ignoring answer for call {} in state {}", self.id, self.state);
                    return;
                }
                if let Some(sdp) = params.sdp() {
                    if !self.apply_remote(sdp).await {
                        return;
                    }
                } else if self.remote_description.is_none() {
                    warn!(target: "Session/Call", "Call {} answered without a description", self.id);
                }
                if let Err(e) = self.transition(CallTransition::RemoteAnswered) {
                    debug!(target: "Session/Call", "Call {}: {e}", self.id);
                }
            }
            Method::Ringing => {
                if self.direction == CallDirection::Outbound {
                    if let Err(e) = self.transition(CallTransition::RemoteRinging) {
                        debug!(target: "Session/Call", "Call {}: {e}", self.id);
                    }
                }
            }
            Method::Bye => {
                let reason = EndReason::RemoteBye {
                    cause: params.cause().map(str::to_string),
                    cause_code: params.cause_code(),
                };
                self.terminate(reason, None).await;
            }
            Method::Invite => {
                debug!(target: "Session/Call", "Duplicate invite for call {}", self.id);
            }
            other => {
                debug!(target: "Session/Call", "Unhandled method {} for call {}", other, self.id);
            }
        }
    }

    /// Attach a remote description. Returns false if the call ended because of it.
    async fn apply_remote(&mut self, sdp: &str) -> bool {
        if self.is_done() {
            return false;
        }
        let description = SessionDescription::answer(sdp);
        if self.remote_description.as_ref() == Some(&description) {
            return true;
        }
        match self
            .link
            .media
            .set_remote_description(&self.id, description.clone())
            .await
        {
            Ok(()) => {
                self.remote_description = Some(description);
                true
            }
            Err(e) => {
                warn!(target: "Session/Call", "Call {} rejected remote description: {e}", self.id);
                self.fail_negotiation(EndReason::NegotiationFailed(e.to_string()))
                    .await;
                false
            }
        }
    }

    /// Inbound only: produce the answer. The call goes ACTIVE once negotiation settles.
    pub(crate) fn answer(&mut self) -> Result<(), CallError> {
        if self.direction != CallDirection::Inbound {
            return Err(CallError::WrongDirection {
                direction: self.direction,
                operation: "answer",
            });
        }
        if self.answering || self.state != CallState::Connecting {
            return Err(InvalidTransition {
                current_state: self.state.name().to_string(),
                attempted: "LocalAnswered".to_string(),
            }
            .into());
        }
        self.answering = true;
        let offer = self.remote_offer.take();
        self.remote_description = offer.clone();
        self.begin_negotiation(offer);
        Ok(())
    }

    /// Local hangup. No-op on a finished call.
    pub(crate) async fn hangup(&mut self) {
        if self.is_done() {
            return;
        }
        let rejecting = self.direction == CallDirection::Inbound && self.state.is_pending();
        let (reason, cause) = if rejecting {
            (EndReason::Rejected, HangupCause::UserBusy)
        } else {
            (EndReason::LocalHangup, HangupCause::NormalClearing)
        };
        let cause = self.server_aware.then_some(cause);
        self.terminate(reason, cause).await;
    }

    /// Enter DONE: cancel negotiation, optionally send BYE, release media. Idempotent.
    pub(crate) async fn terminate(&mut self, reason: EndReason, bye: Option<HangupCause>) {
        if self.is_done() {
            return;
        }
        self.negotiation.cancel();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
        if let Some(cause) = bye {
            self.send(self.message(Method::Bye).cause(cause));
        }
        if let Err(e) = self.transition(CallTransition::End { reason }) {
            warn!(target: "Session/Call", "Call {} could not end: {e}", self.id);
        }
        self.link.media.close(&self.id).await;
    }

    pub(crate) fn hold(&mut self) -> Result<(), CallError> {
        self.transition(CallTransition::Hold)?;
        self.link
            .media
            .set_track_enabled(&self.id, TrackRole::Audio, false);
        if self.options.video {
            self.link
                .media
                .set_track_enabled(&self.id, TrackRole::Video, false);
        }
        self.send(self.message(Method::Modify).action("hold"));
        Ok(())
    }

    pub(crate) fn unhold(&mut self) -> Result<(), CallError> {
        self.transition(CallTransition::Resume)?;
        self.link
            .media
            .set_track_enabled(&self.id, TrackRole::Audio, !self.mutes.audio);
        if self.options.video {
            self.link
                .media
                .set_track_enabled(&self.id, TrackRole::Video, !self.mutes.video);
        }
        self.send(self.message(Method::Modify).action("unhold"));
        Ok(())
    }

    /// Mute or unmute one outbound track. While held, only the flag changes.
    pub(crate) fn set_muted(&mut self, role: TrackRole, muted: bool) -> Result<(), CallError> {
        if self.is_done() {
            return Err(InvalidTransition {
                current_state: self.state.name().to_string(),
                attempted: format!("SetMuted({role:?}, {muted})"),
            }
            .into());
        }
        self.mutes.set(role, muted);
        if !self.state.is_held() {
            self.link.media.set_track_enabled(&self.id, role, !muted);
        }
        Ok(())
    }

    pub(crate) fn send_dtmf(&mut self, digits: &str) -> Result<(), CallError> {
        if digits.is_empty() {
            return Err(CallError::DigitsRequired);
        }
        if !digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | '#' | 'A'..='D'))
        {
            return Err(CallError::InvalidDigits(digits.to_string()));
        }
        if !self.state.is_active() {
            return Err(InvalidTransition {
                current_state: self.state.name().to_string(),
                attempted: "SendDtmf".to_string(),
            }
            .into());
        }
        self.send(self.message(Method::Info).dtmf(digits));
        Ok(())
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}
