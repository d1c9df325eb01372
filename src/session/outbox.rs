//! Fire-and-forget outbound queue.
//!
//! Requests get ids from a per-session counter and are remembered in the
//! pending table until a result or error with the same id comes back. A
//! single pump task writes queued envelopes to the current transport in
//! order; callers never wait on the network.

use crate::signaling::{Envelope, Method, Params, Request, RequestId, Response};
use dashmap::DashMap;
use log::{debug, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Envelope>,
    next_id: Arc<AtomicU64>,
    pending: Arc<DashMap<u64, Method>>,
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Outbox {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                next_id: Arc::new(AtomicU64::new(1)),
                pending: Arc::new(DashMap::new()),
            },
            rx,
        )
    }

    /// Generates a new request id.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a request and remember what it was for. Returns its id.
    pub fn request(&self, method: Method, params: Params) -> u64 {
        let id = self.next_request_id();
        trace!(target: "Session/Outbox", "Queueing {} (id {})", method, id);
        self.pending.insert(id, method.clone());
        self.push(Request::new(id, method, params).into());
        id
    }

    /// Queue a response to a server request.
    pub fn respond(&self, response: Response) {
        self.push(Envelope::Result(response));
    }

    fn push(&self, envelope: Envelope) {
        if self.tx.send(envelope).is_err() {
            debug!(target: "Session/Outbox", "Outbound pump is gone, dropping envelope");
        }
    }

    /// Forget and return the method a result or error answers.
    pub fn take_pending(&self, id: Option<&RequestId>) -> Option<Method> {
        match id? {
            RequestId::Number(n) => self.pending.remove(n).map(|(_, method)| method),
            RequestId::Text(text) => {
                let n = text.parse::<u64>().ok()?;
                self.pending.remove(&n).map(|(_, method)| method)
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear_pending(&self) {
        self.pending.clear();
    }
}
