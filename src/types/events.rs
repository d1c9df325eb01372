use crate::calls::{CallId, CallState, CallStateChanged, EndReason, PeerInfo};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncomingCall {
    pub call_id: CallId,
    pub peer: PeerInfo,
    /// Whether the INVITE carried a remote offer.
    pub has_offer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallEnded {
    pub call_id: CallId,
    pub reason: EndReason,
}

/// Errors surfaced to the application without affecting session or calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ClientError {
    /// Error envelope from the server. `request` is the method it answered, when known.
    Server {
        code: i64,
        message: String,
        request: Option<String>,
    },
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    Connected,
    Disconnected,
    ClientReady,
    SessionIdUpdated(String),
    IncomingCall(IncomingCall),
    CallStateChanged(CallStateChanged),
    CallEnded(CallEnded),
    ClientError(ClientError),
}

impl Event {
    /// The call this event is about, if any.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::IncomingCall(e) => Some(&e.call_id),
            Self::CallStateChanged(e) => Some(&e.call_id),
            Self::CallEnded(e) => Some(&e.call_id),
            _ => None,
        }
    }

    pub fn is_terminal_state(&self) -> bool {
        matches!(
            self,
            Self::CallStateChanged(CallStateChanged {
                state: CallState::Done { .. },
                ..
            })
        )
    }
}

/// Synchronous observer. Handlers run on the session's control sequence and must not block.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

/// Fan-out to registered handlers plus a broadcast stream.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    stream: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            handlers: Arc::default(),
            stream: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .push(handler);
    }

    /// Returns true if there are any event handlers registered.
    pub fn has_handlers(&self) -> bool {
        !self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.stream.subscribe()
    }

    pub fn dispatch(&self, event: &Event) {
        for handler in self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .iter()
        {
            handler.handle_event(event);
        }
        // Lagging or absent subscribers are their own problem.
        let _ = self.stream.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl EventHandler for Recorder {
        fn handle_event(&self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_dispatch_reaches_handlers_and_subscribers() {
        let bus = EventBus::new();
        assert!(!bus.has_handlers());
        let recorder = Arc::new(Recorder::default());
        bus.add_handler(recorder.clone());
        let mut rx = bus.subscribe();

        bus.dispatch(&Event::SessionIdUpdated("S1".into()));

        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            &[Event::SessionIdUpdated("S1".into())]
        );
        assert_eq!(rx.try_recv().unwrap(), Event::SessionIdUpdated("S1".into()));
    }

    #[test]
    fn test_dispatch_without_listeners() {
        EventBus::new().dispatch(&Event::Connected);
    }

    #[test]
    fn test_call_id_accessor() {
        let ended = Event::CallEnded(CallEnded {
            call_id: CallId::new("U1"),
            reason: EndReason::LocalHangup,
        });
        assert_eq!(ended.call_id(), Some(&CallId::new("U1")));
        assert_eq!(Event::ClientReady.call_id(), None);
        assert!(!ended.is_terminal_state());
    }
}
