//! Call-related error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call not found: {0}")]
    NotFound(String),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("call already exists: {0}")]
    AlreadyExists(String),

    #[error("operation not valid for {direction} call: {operation}")]
    WrongDirection {
        direction: super::CallDirection,
        operation: &'static str,
    },

    #[error("dtmf digits required")]
    DigitsRequired,

    #[error("invalid dtmf digits: {0}")]
    InvalidDigits(String),
}
