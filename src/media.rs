//! Media collaborator contract.
//!
//! The media engine owns capture, encoding and transport. The signaling core
//! only schedules negotiation: it asks for a local description, receives
//! locally gathered candidates through a [`CandidateSink`], and hands remote
//! descriptions back. Descriptions are opaque blobs here.

use crate::calls::CallId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to produce local description: {0}")]
    Description(String),

    #[error("failed to apply remote description: {0}")]
    RemoteDescription(String),

    #[error("no media session for call {0}")]
    UnknownCall(CallId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Offer or answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An opaque session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One locally discovered network path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.candidate)
    }
}

/// Track roles the client can mute independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackRole {
    Audio,
    Video,
}

/// What the media engine should negotiate for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    pub use_stereo: bool,
    pub screen_share: bool,
}

/// A candidate reported by the media engine, tagged with its call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEvent {
    pub call_id: CallId,
    pub candidate: IceCandidate,
}

/// Handle through which the media engine reports gathered candidates.
///
/// Safe to use from any thread; candidates are queued onto the session's
/// control sequence. Sends after the session is gone are dropped.
#[derive(Debug, Clone)]
pub struct CandidateSink {
    call_id: CallId,
    tx: mpsc::UnboundedSender<CandidateEvent>,
}

impl CandidateSink {
    pub(crate) fn new(call_id: CallId, tx: mpsc::UnboundedSender<CandidateEvent>) -> Self {
        Self { call_id, tx }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Report one gathered candidate. Returns false if nobody is listening anymore.
    pub fn candidate(&self, candidate: IceCandidate) -> bool {
        self.tx
            .send(CandidateEvent {
                call_id: self.call_id.clone(),
                candidate,
            })
            .is_ok()
    }
}

/// The media engine consumed by the signaling core.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Produce the local description for a call (offer when `remote_offer` is
    /// `None`, answer otherwise). Completes once. Candidates found afterwards
    /// are pushed into `candidates` for as long as gathering runs.
    async fn produce_local_description(
        &self,
        call_id: &CallId,
        constraints: MediaConstraints,
        remote_offer: Option<SessionDescription>,
        candidates: CandidateSink,
    ) -> Result<SessionDescription, MediaError>;

    /// Current local description including every candidate gathered so far.
    fn local_description(&self, call_id: &CallId) -> Option<SessionDescription>;

    async fn set_local_description(
        &self,
        call_id: &CallId,
        description: SessionDescription,
    ) -> Result<(), MediaError>;

    async fn set_remote_description(
        &self,
        call_id: &CallId,
        description: SessionDescription,
    ) -> Result<(), MediaError>;

    /// Enable or disable the outbound track of the given role.
    fn set_track_enabled(&self, call_id: &CallId, role: TrackRole, enabled: bool);

    /// Release every media resource held for the call.
    async fn close(&self, call_id: &CallId);
}
