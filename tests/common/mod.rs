#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use verto_rust::calls::CallId;
use verto_rust::media::{
    CandidateSink, IceCandidate, MediaConstraints, MediaEngine, MediaError, SessionDescription,
    TrackRole,
};
use verto_rust::transport::{Transport, TransportEvent, TransportFactory};
use verto_rust::{Credentials, Event, Session, SessionConfig};

const WAIT: Duration = Duration::from_secs(5);

/// A transport whose frames land in the paired [`TestServer`].
pub struct MockTransport {
    sent: mpsc::UnboundedSender<String>,
    connected: AtomicBool,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl MockTransport {
    /// Flip the reported connection state without emitting any event.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, text: &str) -> Result<(), anyhow::Error> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("mock transport is closed"));
        }
        self.sent
            .send(text.to_string())
            .map_err(|_| anyhow::anyhow!("test server dropped"))
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.events.lock().unwrap().take();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Server side of one mock connection.
pub struct TestServer {
    pub transport: Arc<MockTransport>,
    events: mpsc::Sender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<String>,
    sync_seq: u64,
}

impl TestServer {
    pub async fn emit(&self, event: TransportEvent) {
        self.events.send(event).await.expect("session read loop gone");
    }

    pub async fn connected(&self) {
        self.emit(TransportEvent::Connected).await;
    }

    pub async fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string()).await;
    }

    pub async fn push_raw(&self, text: &str) {
        self.emit(TransportEvent::TextReceived(text.to_string())).await;
    }

    /// Push a server request with the given id.
    pub async fn request(&self, id: &str, method: &str, params: Value) {
        self.push(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
    }

    /// Next frame the session sent, parsed.
    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("transport dropped");
        serde_json::from_str(&text).expect("session sent invalid json")
    }

    /// Next request the session sent, skipping acks.
    pub async fn next_request(&mut self) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame.get("method").is_some() {
                return frame;
            }
        }
    }

    /// Push a ping and wait for its ack. Every frame sent before the ack is
    /// returned. Inbound frames are handled in order, so everything pushed
    /// before this call has been processed when it returns.
    pub async fn sync(&mut self) -> Vec<Value> {
        self.sync_seq += 1;
        let id = format!("sync-{}", self.sync_seq);
        self.request(&id, "verto.ping", json!({})).await;
        let mut before = Vec::new();
        loop {
            let frame = self.next_frame().await;
            if frame["id"] == id.as_str() && frame.get("result").is_some() {
                return before;
            }
            before.push(frame);
        }
    }

    pub fn try_next_frame(&mut self) -> Option<Value> {
        self.sent
            .try_recv()
            .ok()
            .map(|text| serde_json::from_str(&text).expect("session sent invalid json"))
    }
}

/// Hands each created transport's server side to the test.
pub struct MockTransportFactory {
    servers: mpsc::UnboundedSender<TestServer>,
    pub created: AtomicU64,
}

impl MockTransportFactory {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TestServer>) {
        let (servers, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                servers,
                created: AtomicU64::new(0),
            }),
            rx,
        )
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let (event_tx, event_rx) = mpsc::channel(100);
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            sent: sent_tx,
            connected: AtomicBool::new(true),
            events: Mutex::new(Some(event_tx.clone())),
        });
        self.servers
            .send(TestServer {
                transport: transport.clone(),
                events: event_tx,
                sent: sent_rx,
                sync_seq: 0,
            })
            .map_err(|_| anyhow::anyhow!("test dropped the server receiver"))?;
        Ok((transport, event_rx))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaOp {
    Produce { call_id: CallId, has_offer: bool },
    SetLocal(CallId),
    SetRemote(CallId, String),
    Track(CallId, TrackRole, bool),
    Close(CallId),
}

/// Media engine that records every call and lets the test feed candidates.
#[derive(Default)]
pub struct MockMediaEngine {
    ops: Mutex<Vec<MediaOp>>,
    sinks: Mutex<HashMap<CallId, CandidateSink>>,
    pub fail_produce: AtomicBool,
    pub fail_remote: AtomicBool,
    early_candidates: Mutex<Vec<String>>,
    produce_delay: Mutex<Duration>,
}

impl MockMediaEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Candidates reported from inside `produce_local_description`, before
    /// the description is returned.
    pub fn gather_early(&self, candidates: &[&str]) {
        *self.early_candidates.lock().unwrap() =
            candidates.iter().map(|c| c.to_string()).collect();
    }

    /// How long `produce_local_description` takes after gathering early candidates.
    pub fn set_produce_delay(&self, delay: Duration) {
        *self.produce_delay.lock().unwrap() = delay;
    }

    pub fn ops(&self) -> Vec<MediaOp> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: MediaOp) {
        self.ops.lock().unwrap().push(op);
    }

    /// Report a gathered candidate for the call, as the engine would.
    pub fn emit_candidate(&self, call_id: &CallId, candidate: &str) {
        let sinks = self.sinks.lock().unwrap();
        let sink = sinks.get(call_id).expect("no negotiation running for call");
        sink.candidate(IceCandidate::new(candidate));
    }

    pub fn has_sink(&self, call_id: &CallId) -> bool {
        self.sinks.lock().unwrap().contains_key(call_id)
    }

    pub fn remote_sdp(&self, call_id: &CallId) -> Option<String> {
        self.ops().into_iter().rev().find_map(|op| match op {
            MediaOp::SetRemote(id, sdp) if &id == call_id => Some(sdp),
            _ => None,
        })
    }
}

pub fn local_sdp(call_id: &CallId) -> String {
    format!("v=0 local {call_id}")
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn produce_local_description(
        &self,
        call_id: &CallId,
        _constraints: MediaConstraints,
        remote_offer: Option<SessionDescription>,
        candidates: CandidateSink,
    ) -> Result<SessionDescription, MediaError> {
        self.record(MediaOp::Produce {
            call_id: call_id.clone(),
            has_offer: remote_offer.is_some(),
        });
        if self.fail_produce.load(Ordering::SeqCst) {
            return Err(MediaError::Description("no microphone".into()));
        }
        let early = std::mem::take(&mut *self.early_candidates.lock().unwrap());
        for candidate in early {
            candidates.candidate(IceCandidate::new(candidate));
        }
        self.sinks.lock().unwrap().insert(call_id.clone(), candidates);
        let delay = *self.produce_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(match remote_offer {
            Some(_) => SessionDescription::answer(local_sdp(call_id)),
            None => SessionDescription::offer(local_sdp(call_id)),
        })
    }

    fn local_description(&self, _call_id: &CallId) -> Option<SessionDescription> {
        None
    }

    async fn set_local_description(
        &self,
        call_id: &CallId,
        _description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.record(MediaOp::SetLocal(call_id.clone()));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        call_id: &CallId,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(MediaError::RemoteDescription("bad sdp".into()));
        }
        self.record(MediaOp::SetRemote(call_id.clone(), description.sdp));
        Ok(())
    }

    fn set_track_enabled(&self, call_id: &CallId, role: TrackRole, enabled: bool) {
        self.record(MediaOp::Track(call_id.clone(), role, enabled));
    }

    async fn close(&self, call_id: &CallId) {
        self.sinks.lock().unwrap().remove(call_id);
        self.record(MediaOp::Close(call_id.clone()));
    }
}

pub struct Harness {
    pub session: Arc<Session>,
    pub media: Arc<MockMediaEngine>,
    pub factory: Arc<MockTransportFactory>,
    pub servers: mpsc::UnboundedReceiver<TestServer>,
    pub events: broadcast::Receiver<Event>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let media = MockMediaEngine::new();
        let (factory, servers) = MockTransportFactory::new();
        let session = Session::new(config, factory.clone(), media.clone());
        let events = session.subscribe();
        Self {
            session,
            media,
            factory,
            servers,
            events,
        }
    }

    /// Connect and hand back the server side. No login result is sent.
    pub async fn connect(&mut self, credentials: Credentials) -> TestServer {
        self.session
            .connect(credentials)
            .await
            .expect("connect should succeed");
        let server = tokio::time::timeout(WAIT, self.servers.recv())
            .await
            .expect("no transport created")
            .expect("factory dropped");
        server.connected().await;
        server
    }

    /// Connect with token `T` and answer the login with session id `S1`.
    pub async fn logged_in(&mut self) -> TestServer {
        let mut server = self.connect(Credentials::token("T")).await;
        let login = server.next_request().await;
        assert_eq!(login["method"], "login");
        server
            .push(json!({"jsonrpc": "2.0", "id": login["id"], "result": {"sessid": "S1"}}))
            .await;
        server.sync().await;
        self.drain_events();
        server
    }

    /// Wait for the first event matching `pred`, returning it.
    pub async fn wait_event(&mut self, pred: impl Fn(&Event) -> bool) -> Event {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                match self.events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) => {}
                    Err(e) => panic!("event stream failed: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Every event delivered so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Let spawned tasks run without moving the clock.
pub async fn settle_tasks() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Yield until `cond` holds. The clock does not move.
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
