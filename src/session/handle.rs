use super::{Session, SessionError};
use crate::calls::{Call, CallError, CallId, CallState, CallStateChanged};
use crate::media::TrackRole;
use log::debug;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Cheap handle to a call in a session's registry.
///
/// Every operation goes through the session's registry lock. Once the call
/// reaches DONE it leaves the registry; `hangup` is then a no-op and the
/// other operations fail with [`CallError::NotFound`].
#[derive(Clone)]
pub struct CallHandle {
    call_id: CallId,
    session: Arc<Session>,
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("call_id", &self.call_id)
            .finish_non_exhaustive()
    }
}

impl CallHandle {
    pub(crate) fn new(call_id: CallId, session: Arc<Session>) -> Self {
        Self { call_id, session }
    }

    pub fn id(&self) -> &CallId {
        &self.call_id
    }

    /// Current state, or `None` once the call has ended and left the registry.
    pub async fn state(&self) -> Option<CallState> {
        self.session.call_state(&self.call_id).await
    }

    /// Per-call state-change stream, or `None` if the call has already ended.
    pub async fn subscribe(&self) -> Option<broadcast::Receiver<CallStateChanged>> {
        self.session
            .calls
            .lock()
            .await
            .get(&self.call_id)
            .map(Call::subscribe)
    }

    /// Answer an inbound call. It goes ACTIVE once negotiation settles.
    pub async fn answer(&self) -> Result<(), SessionError> {
        self.session.with_call(&self.call_id, Call::answer).await
    }

    pub async fn hangup(&self) {
        self.session.hangup_call(&self.call_id).await;
    }

    pub async fn hold(&self) -> Result<(), SessionError> {
        self.session.with_call(&self.call_id, Call::hold).await
    }

    pub async fn unhold(&self) -> Result<(), SessionError> {
        self.session.with_call(&self.call_id, Call::unhold).await
    }

    pub async fn mute_audio(&self) -> Result<(), SessionError> {
        self.set_muted(TrackRole::Audio, true).await
    }

    pub async fn unmute_audio(&self) -> Result<(), SessionError> {
        self.set_muted(TrackRole::Audio, false).await
    }

    pub async fn mute_video(&self) -> Result<(), SessionError> {
        self.set_muted(TrackRole::Video, true).await
    }

    pub async fn unmute_video(&self) -> Result<(), SessionError> {
        self.set_muted(TrackRole::Video, false).await
    }

    async fn set_muted(&self, role: TrackRole, muted: bool) -> Result<(), SessionError> {
        self.session
            .with_call(&self.call_id, |call| call.set_muted(role, muted))
            .await
    }

    pub async fn send_dtmf(&self, digits: &str) -> Result<(), SessionError> {
        self.session
            .with_call(&self.call_id, |call| call.send_dtmf(digits))
            .await
    }
}

impl Session {
    async fn with_call<R>(
        &self,
        call_id: &CallId,
        op: impl FnOnce(&mut Call) -> Result<R, CallError>,
    ) -> Result<R, SessionError> {
        let mut calls = self.calls.lock().await;
        let call = calls
            .get_mut(call_id)
            .ok_or_else(|| CallError::NotFound(call_id.to_string()))?;
        let result = op(call);
        self.publish_changes(&mut calls, call_id);
        Ok(result?)
    }

    async fn hangup_call(&self, call_id: &CallId) {
        let mut calls = self.calls.lock().await;
        let Some(call) = calls.get_mut(call_id) else {
            debug!(target: "Session", "Hangup for ended call {call_id}");
            return;
        };
        call.hangup().await;
        self.publish_changes(&mut calls, call_id);
    }
}
