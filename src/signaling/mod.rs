//! Signaling envelope codec.
//!
//! - [`Method`]: the Verto methods the client interprets
//! - [`Envelope`]: one decoded JSON-RPC message (request, result or error)
//! - [`CallParams`]: typed view over the call keys inside `params`

mod envelope;
mod method;

pub use envelope::{
    CallParams, DecodeError, Envelope, ErrorResponse, JSONRPC_VERSION, Params, Request,
    RequestId, Response, RpcError,
};
pub use method::Method;
