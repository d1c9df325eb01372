//! Signaling session: connection lifecycle, login, and the call registry.
//!
//! All call mutations (inbound frames, local operations, candidates, timer
//! signals, finished description requests) run while holding the registry
//! lock, so one call never sees two of them at once. Inbound frames are read
//! by a single task and handled strictly in arrival order.

mod error;
mod handle;
mod login;
mod outbox;
mod router;

pub use error::SessionError;
pub use handle::CallHandle;
pub use login::login_params;
pub use outbox::Outbox;

use crate::calls::{
    Call, CallError, CallId, CallLink, CallOptions, CallState, EndReason, LocalDescriptionResult,
    NegotiationSignal, PeerInfo,
};
use crate::config::{Credentials, LoginMethod, SessionConfig};
use crate::media::{CandidateEvent, MediaEngine};
use crate::signaling::{Envelope, Method};
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::events::{CallEnded, ClientError, Event, EventBus, EventHandler};
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot};

type Registry = HashMap<CallId, Call>;

pub struct Session {
    config: SessionConfig,
    transport_factory: Arc<dyn TransportFactory>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    login: Mutex<Option<LoginMethod>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,

    is_connected: AtomicBool,
    is_connecting: AtomicBool,
    /// Bumped on every connect and disconnect; read loops of older connections go quiet.
    connection_generation: AtomicU64,

    session_id: RwLock<Option<String>>,
    calls: Mutex<Registry>,

    event_bus: EventBus,
    outbox: Outbox,
    link: CallLink,
}

struct ControlChannels {
    candidates: mpsc::UnboundedReceiver<CandidateEvent>,
    descriptions: mpsc::UnboundedReceiver<LocalDescriptionResult>,
    signals: mpsc::UnboundedReceiver<NegotiationSignal>,
}

enum Control {
    Candidate(CandidateEvent),
    Description(LocalDescriptionResult),
    Signal(NegotiationSignal),
}

impl Session {
    /// Create a session and start its outbound and control pumps.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: SessionConfig,
        transport_factory: Arc<dyn TransportFactory>,
        media: Arc<dyn MediaEngine>,
    ) -> Arc<Self> {
        let (outbox, outgoing) = Outbox::new();
        let (candidates_tx, candidates) = mpsc::unbounded_channel();
        let (descriptions_tx, descriptions) = mpsc::unbounded_channel();
        let (signals_tx, signals) = mpsc::unbounded_channel();

        let link = CallLink {
            media,
            outbox: outbox.clone(),
            candidates: candidates_tx,
            descriptions: descriptions_tx,
            signals: signals_tx,
            window: config.negotiation_window,
            ceiling: config.negotiation_ceiling,
        };

        let session = Arc::new(Self {
            config,
            transport_factory,
            transport: Mutex::new(None),
            login: Mutex::new(None),
            shutdown: Mutex::new(None),
            is_connected: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            connection_generation: AtomicU64::new(0),
            session_id: RwLock::new(None),
            calls: Mutex::new(HashMap::new()),
            event_bus: EventBus::new(),
            outbox,
            link,
        });

        tokio::spawn(write_pump(Arc::downgrade(&session), outgoing));
        tokio::spawn(control_pump(
            Arc::downgrade(&session),
            ControlChannels {
                candidates,
                descriptions,
                signals,
            },
        ));

        session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.event_bus.add_handler(handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_bus.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Acquire)
    }

    pub async fn get_session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Open a transport and log in once it reports connected.
    pub async fn connect(self: &Arc<Self>, credentials: Credentials) -> Result<(), SessionError> {
        let login = credentials
            .login_method()
            .ok_or(SessionError::CredentialsRequired)?;

        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyConnected);
        }

        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });

        if self.is_connected() || self.transport.lock().await.is_some() {
            return Err(SessionError::AlreadyConnected);
        }

        *self.login.lock().await = Some(login);

        info!(target: "Session", "Connecting to signaling server...");
        let (transport, transport_events) = self.transport_factory.create_transport().await?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let generation = {
            let mut slot = self.transport.lock().await;
            *slot = Some(transport);
            self.connection_generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        *self.shutdown.lock().await = Some(shutdown_tx);

        let session = self.clone();
        tokio::spawn(async move {
            session
                .read_messages_loop(transport_events, shutdown_rx, generation)
                .await;
        });

        Ok(())
    }

    /// Close the transport and end every live call.
    pub async fn disconnect(&self) {
        let Some(transport) = self.claim_teardown(None).await else {
            debug!(target: "Session", "Disconnect requested while not connected");
            return;
        };

        info!(target: "Session", "Disconnecting session intentionally.");
        if let Some(shutdown) = self.shutdown.lock().await.take() {
            let _ = shutdown.send(());
        }
        transport.disconnect().await;
        self.cleanup_connection_state().await;
    }

    /// Take the transport and retire its generation. Exactly one of
    /// `disconnect` and a lost read loop gets `Some` for a given connection.
    /// `expected` restricts the claim to that generation.
    async fn claim_teardown(&self, expected: Option<u64>) -> Option<Arc<dyn Transport>> {
        let mut transport = self.transport.lock().await;
        if let Some(generation) = expected {
            if self.connection_generation.load(Ordering::SeqCst) != generation {
                return None;
            }
        }
        let claimed = transport.take()?;
        self.connection_generation.fetch_add(1, Ordering::SeqCst);
        Some(claimed)
    }

    async fn cleanup_connection_state(&self) {
        self.end_all_calls(EndReason::SessionClosed).await;
        self.is_connected.store(false, Ordering::Release);
        *self.session_id.write().await = None;
        self.outbox.clear_pending();
        self.event_bus.dispatch(&Event::Disconnected);
    }

    async fn read_messages_loop(
        self: Arc<Self>,
        mut transport_events: mpsc::Receiver<TransportEvent>,
        mut shutdown: oneshot::Receiver<()>,
        generation: u64,
    ) {
        info!(target: "Session", "Starting message processing loop...");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(target: "Session", "Shutdown signaled. Exiting message loop.");
                    return;
                }
                event = transport_events.recv() => match event {
                    Some(TransportEvent::Connected) => self.on_transport_connected().await,
                    Some(TransportEvent::TextReceived(text)) => {
                        trace!(target: "Session", "<-- {} bytes", text.len());
                        self.handle_message(&text).await;
                    }
                    Some(TransportEvent::Error(e)) => {
                        warn!(target: "Session", "Transport error: {e}");
                        self.event_bus
                            .dispatch(&Event::ClientError(ClientError::Transport(e)));
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        self.on_transport_lost(generation).await;
                        return;
                    }
                }
            }
        }
    }

    async fn on_transport_connected(&self) {
        self.is_connected.store(true, Ordering::Release);
        info!(target: "Session", "Transport connected, sending login");
        self.event_bus.dispatch(&Event::Connected);

        let login = self.login.lock().await.clone();
        match login {
            Some(login) => {
                let params = login_params(&login, &self.config.user_variables);
                self.outbox.request(Method::Login, params);
            }
            None => warn!(target: "Session", "Connected without credentials, not logging in"),
        }
    }

    async fn on_transport_lost(&self, generation: u64) {
        if self.claim_teardown(Some(generation)).await.is_none() {
            debug!(target: "Session", "Stale transport closed");
            return;
        }
        warn!(target: "Session", "Transport disconnected unexpectedly.");
        *self.shutdown.lock().await = None;
        self.cleanup_connection_state().await;
    }

    /// Place an outbound call.
    pub async fn new_call(
        self: &Arc<Self>,
        peer: PeerInfo,
        options: CallOptions,
    ) -> Result<CallHandle, SessionError> {
        let session_id = self
            .get_session_id()
            .await
            .ok_or(SessionError::SessionRequired)?;
        if !self.transport_connected().await {
            return Err(SessionError::NotConnected);
        }
        if peer.destination_number.trim().is_empty() {
            return Err(SessionError::DestinationRequired);
        }

        let mut calls = self.calls.lock().await;
        if calls.len() >= self.config.max_concurrent_calls {
            return Err(SessionError::TooManyCalls(self.config.max_concurrent_calls));
        }
        let call_id = options.call_id.clone().unwrap_or_else(CallId::generate);
        if calls.contains_key(&call_id) {
            return Err(CallError::AlreadyExists(call_id.to_string()).into());
        }

        info!(
            target: "Session",
            "New call {} to {}",
            call_id, peer.destination_number
        );
        let mut call = Call::new_outbound(
            call_id.clone(),
            session_id,
            peer,
            options,
            self.link.clone(),
        );
        call.start()?;
        calls.insert(call_id.clone(), call);
        self.publish_changes(&mut calls, &call_id);

        Ok(CallHandle::new(call_id, self.clone()))
    }

    async fn transport_connected(&self) -> bool {
        self.is_connected()
            && self
                .transport
                .lock()
                .await
                .as_ref()
                .is_some_and(|t| t.is_connected())
    }

    /// Handle for a live call.
    pub async fn call(self: &Arc<Self>, call_id: &CallId) -> Option<CallHandle> {
        self.calls
            .lock()
            .await
            .contains_key(call_id)
            .then(|| CallHandle::new(call_id.clone(), self.clone()))
    }

    /// Ids of every live call.
    pub async fn active_calls(&self) -> Vec<CallId> {
        let mut ids: Vec<CallId> = self.calls.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn call_state(&self, call_id: &CallId) -> Option<CallState> {
        self.calls
            .lock()
            .await
            .get(call_id)
            .map(|call| call.state().clone())
    }

    /// Fan out a call's recorded transitions; a DONE call leaves the registry here and only here.
    fn publish_changes(&self, calls: &mut Registry, call_id: &CallId) {
        let Some(call) = calls.get_mut(call_id) else {
            return;
        };
        let mut ended = None;
        for change in call.take_state_changes() {
            if let CallState::Done { reason, .. } = &change.state {
                ended = Some(reason.clone());
            }
            self.event_bus.dispatch(&Event::CallStateChanged(change));
        }
        if let Some(reason) = ended {
            calls.remove(call_id);
            info!(target: "Session", "Call {} ended ({:?})", call_id, reason);
            self.event_bus.dispatch(&Event::CallEnded(CallEnded {
                call_id: call_id.clone(),
                reason,
            }));
        }
    }

    async fn end_all_calls(&self, reason: EndReason) {
        let mut calls = self.calls.lock().await;
        let ids: Vec<CallId> = calls.keys().cloned().collect();
        for id in ids {
            if let Some(call) = calls.get_mut(&id) {
                call.terminate(reason.clone(), None).await;
            }
            self.publish_changes(&mut calls, &id);
        }
    }

    async fn apply_control(&self, control: Control) {
        let mut calls = self.calls.lock().await;
        let call_id = match control {
            Control::Candidate(event) => {
                let Some(call) = calls.get_mut(&event.call_id) else {
                    trace!(target: "Session/Negotiation", "Candidate for unknown call {}", event.call_id);
                    return;
                };
                call.on_candidate(event.candidate);
                event.call_id
            }
            Control::Description(done) => {
                let Some(call) = calls.get_mut(&done.call_id) else {
                    debug!(target: "Session/Negotiation", "Description for unknown call {}", done.call_id);
                    return;
                };
                call.on_local_description(done.result).await;
                done.call_id
            }
            Control::Signal(signal) => {
                let Some(call) = calls.get_mut(&signal.call_id) else {
                    trace!(target: "Session/Negotiation", "Timer for unknown call {}", signal.call_id);
                    return;
                };
                call.on_negotiation_signal(&signal).await;
                signal.call_id
            }
        };
        self.publish_changes(&mut calls, &call_id);
    }

    async fn write_envelope(&self, envelope: Envelope) {
        let transport = self.transport.lock().await.clone();
        let Some(transport) = transport.filter(|t| t.is_connected()) else {
            debug!(target: "Session", "Not connected, dropping outbound envelope");
            return;
        };
        let text = envelope.encode();
        trace!(target: "Session", "--> {} bytes", text.len());
        if let Err(e) = transport.send(&text).await {
            warn!(target: "Session", "Failed to send envelope: {e}");
        }
    }
}

async fn write_pump(session: Weak<Session>, mut outgoing: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = outgoing.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        session.write_envelope(envelope).await;
    }
}

async fn control_pump(session: Weak<Session>, mut channels: ControlChannels) {
    loop {
        let control = tokio::select! {
            biased;
            Some(done) = channels.descriptions.recv() => Control::Description(done),
            Some(event) = channels.candidates.recv() => Control::Candidate(event),
            Some(signal) = channels.signals.recv() => Control::Signal(signal),
            else => break,
        };
        let Some(session) = session.upgrade() else {
            break;
        };
        session.apply_control(control).await;
    }
}
