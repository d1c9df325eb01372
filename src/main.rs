use async_trait::async_trait;
use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use verto_rust::calls::CallId;
use verto_rust::media::{
    CandidateSink, IceCandidate, MediaConstraints, MediaEngine, MediaError, SessionDescription,
    TrackRole,
};
use verto_rust::transport::TokioWebSocketTransportFactory;
use verto_rust::{CallOptions, Credentials, Event, PeerInfo, Session, SessionConfig};

// A small signaling client: logs in, optionally places one call, and logs
// every session event until Ctrl-C.
//
// Usage:
//   VERTO_URL=wss://pbx.example.com:8082 VERTO_TOKEN=... cargo run
//   cargo run -- --login 1000@pbx --password secret --call 9196
//   cargo run -- --token T --auto-answer

#[derive(Parser, Debug)]
#[command(version, about = "Verto signaling client")]
struct Args {
    /// Signaling server WebSocket URL.
    #[arg(long, env = "VERTO_URL", default_value = "wss://localhost:8082")]
    url: String,

    /// Login token. Takes precedence over login/password.
    #[arg(long, env = "VERTO_TOKEN")]
    token: Option<String>,

    #[arg(long, env = "VERTO_LOGIN")]
    login: Option<String>,

    #[arg(long, env = "VERTO_PASSWORD")]
    password: Option<String>,

    /// Destination to call once logged in.
    #[arg(short, long)]
    call: Option<String>,

    #[arg(long, default_value = "verto-rust")]
    caller_name: String,

    #[arg(long, default_value = "")]
    caller_number: String,

    /// Answer incoming calls automatically.
    #[arg(long)]
    auto_answer: bool,
}

/// Offers a fixed audio description and one loopback candidate. No media flows.
struct PlaceholderMediaEngine;

const PLACEHOLDER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 0\r\nc=IN IP4 0.0.0.0\r\na=rtpmap:0 PCMU/8000\r\n";

#[async_trait]
impl MediaEngine for PlaceholderMediaEngine {
    async fn produce_local_description(
        &self,
        _call_id: &CallId,
        _constraints: MediaConstraints,
        remote_offer: Option<SessionDescription>,
        candidates: CandidateSink,
    ) -> Result<SessionDescription, MediaError> {
        candidates.candidate(IceCandidate::new(
            "candidate:1 1 udp 2130706431 127.0.0.1 9 typ host",
        ));
        Ok(match remote_offer {
            Some(_) => SessionDescription::answer(PLACEHOLDER_SDP),
            None => SessionDescription::offer(PLACEHOLDER_SDP),
        })
    }

    fn local_description(&self, _call_id: &CallId) -> Option<SessionDescription> {
        None
    }

    async fn set_local_description(
        &self,
        _call_id: &CallId,
        _description: SessionDescription,
    ) -> Result<(), MediaError> {
        Ok(())
    }

    async fn set_remote_description(
        &self,
        call_id: &CallId,
        _description: SessionDescription,
    ) -> Result<(), MediaError> {
        info!("Remote description for call {call_id}");
        Ok(())
    }

    fn set_track_enabled(&self, call_id: &CallId, role: TrackRole, enabled: bool) {
        info!("Call {call_id}: {role:?} track enabled={enabled}");
    }

    async fn close(&self, _call_id: &CallId) {}
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            return;
        }
    };

    if let Err(e) = rt.block_on(run(args)) {
        error!("{e:#}");
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let credentials = Credentials {
        login_token: args.token.clone(),
        login: args.login.clone(),
        password: args.password.clone(),
    };

    let session = Session::new(
        SessionConfig::default(),
        Arc::new(TokioWebSocketTransportFactory::new(args.url.clone())),
        Arc::new(PlaceholderMediaEngine),
    );
    let mut events = session.subscribe();
    session.connect(credentials).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, disconnecting");
                session.disconnect().await;
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => on_event(&session, &args, event).await,
                Err(RecvError::Lagged(n)) => warn!("Missed {n} session events"),
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

async fn on_event(session: &Arc<Session>, args: &Args, event: Event) {
    match event {
        Event::SessionIdUpdated(sessid) => {
            info!("Logged in with session {sessid}");
            if let Some(destination) = &args.call {
                let peer = PeerInfo::new(&args.caller_name, &args.caller_number, destination);
                match session.new_call(peer, CallOptions::audio()).await {
                    Ok(call) => info!("Calling {destination} (call {})", call.id()),
                    Err(e) => error!("Failed to place call: {e}"),
                }
            }
        }
        Event::IncomingCall(incoming) => {
            info!(
                "Incoming call {} from {} <{}>",
                incoming.call_id, incoming.peer.caller_name, incoming.peer.caller_number
            );
            if args.auto_answer {
                if let Some(call) = session.call(&incoming.call_id).await {
                    if let Err(e) = call.answer().await {
                        error!("Failed to answer {}: {e}", incoming.call_id);
                    }
                }
            }
        }
        Event::CallStateChanged(change) => info!("Call {} is {}", change.call_id, change.state),
        Event::CallEnded(ended) => info!("Call {} ended: {:?}", ended.call_id, ended.reason),
        Event::ClientError(e) => warn!("Client error: {e:?}"),
        other => info!("{other:?}"),
    }
}
