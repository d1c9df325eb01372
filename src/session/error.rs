use crate::calls::CallError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session id required: login has not completed")]
    SessionRequired,

    #[error("transport is not connected")]
    NotConnected,

    #[error("destination number required")]
    DestinationRequired,

    #[error("credentials required: set a login token or a login and password")]
    CredentialsRequired,

    #[error("session is already connected")]
    AlreadyConnected,

    #[error("too many concurrent calls (limit {0})")]
    TooManyCalls(usize),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}
