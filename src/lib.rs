//! Signaling and session core for a Verto-speaking RTC client.
//!
//! A [`Session`] owns one signaling connection, the login handshake and the
//! registry of live calls. Media is delegated to a [`media::MediaEngine`];
//! the raw connection to a [`transport::TransportFactory`].

pub mod types {
    pub mod events;
}

pub mod calls;
pub mod config;
pub mod media;
pub mod session;
pub mod signaling;
pub mod transport;

pub use calls::{CallDirection, CallId, CallOptions, CallState, EndReason, PeerInfo};
pub use config::{Credentials, SessionConfig};
pub use session::{CallHandle, Session, SessionError};
pub use types::events::{Event, EventHandler};
