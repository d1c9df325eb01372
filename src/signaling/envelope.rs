//! Signaling envelope decoding and encoding.
//!
//! One envelope is one JSON-RPC 2.0 object carried in one text frame. The
//! codec is stateless; callers treat a [`DecodeError`] as a dropped frame.

use super::method::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// Loosely-typed request parameters.
pub type Params = Map<String, Value>;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope is not a json object")]
    NotAnObject,

    #[error("envelope has no method, result or error")]
    UnknownShape,

    #[error("invalid field `{0}`")]
    InvalidField(&'static str),
}

/// Correlation id of a request. Servers may use numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    Text(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(id)
    }
}

/// Error object carried by an error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code={}, message='{}'", self.code, self.message)
    }
}

/// A method invocation: either a server event or a client request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Option<RequestId>,
    pub method: Method,
    pub params: Params,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: Method, params: Params) -> Self {
        Self {
            id: Some(id.into()),
            method,
            params,
        }
    }

    /// Typed view over the call-related parameters.
    pub fn call_params(&self) -> CallParams<'_> {
        CallParams {
            params: &self.params,
        }
    }
}

/// A response to a prior request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: Option<RequestId>,
    pub result: Value,
}

impl Response {
    /// Session identifier issued by a login result.
    pub fn session_id(&self) -> Option<&str> {
        self.result
            .get("sessid")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// An error answer to a prior request.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub id: Option<RequestId>,
    pub error: RpcError,
}

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(Request),
    Result(Response),
    Error(ErrorResponse),
}

impl Envelope {
    /// Decode one text frame.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(mut obj) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                serde_json::from_value::<RequestId>(v)
                    .map_err(|_| DecodeError::InvalidField("id"))?,
            ),
        };

        if let Some(method) = obj.remove("method") {
            let Value::String(method) = method else {
                return Err(DecodeError::InvalidField("method"));
            };
            let params = match obj.remove("params") {
                None | Some(Value::Null) => Params::new(),
                Some(Value::Object(p)) => p,
                Some(_) => return Err(DecodeError::InvalidField("params")),
            };
            return Ok(Self::Request(Request {
                id,
                method: Method::from_wire(&method),
                params,
            }));
        }

        if let Some(error) = obj.remove("error") {
            let error: RpcError =
                serde_json::from_value(error).map_err(|_| DecodeError::InvalidField("error"))?;
            return Ok(Self::Error(ErrorResponse { id, error }));
        }

        if let Some(result) = obj.remove("result") {
            return Ok(Self::Result(Response { id, result }));
        }

        Err(DecodeError::UnknownShape)
    }

    /// Encode into one text frame.
    pub fn encode(&self) -> String {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        let id = match self {
            Self::Request(r) => r.id.as_ref(),
            Self::Result(r) => r.id.as_ref(),
            Self::Error(e) => e.id.as_ref(),
        };
        if let Some(id) = id {
            obj.insert("id".into(), json!(id));
        }
        match self {
            Self::Request(r) => {
                obj.insert("method".into(), Value::from(r.method.as_str()));
                obj.insert("params".into(), Value::Object(r.params.clone()));
            }
            Self::Result(r) => {
                obj.insert("result".into(), r.result.clone());
            }
            Self::Error(e) => {
                obj.insert("error".into(), json!(e.error));
            }
        }
        Value::Object(obj).to_string()
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => r.id.as_ref(),
            Self::Result(r) => r.id.as_ref(),
            Self::Error(e) => e.id.as_ref(),
        }
    }
}

impl From<Request> for Envelope {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

/// Read-only accessors for the params keys the client interprets.
#[derive(Debug, Clone, Copy)]
pub struct CallParams<'a> {
    params: &'a Params,
}

impl<'a> CallParams<'a> {
    fn str_field(&self, key: &str) -> Option<&'a str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    fn dialog_field(&self, key: &str) -> Option<&'a str> {
        self.params
            .get("dialogParams")
            .and_then(|d| d.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// `callID`, at the top level or inside `dialogParams`.
    pub fn call_id(&self) -> Option<&'a str> {
        self.str_field("callID")
            .or_else(|| self.dialog_field("callID"))
    }

    pub fn sdp(&self) -> Option<&'a str> {
        self.str_field("sdp")
    }

    pub fn caller_id_name(&self) -> Option<&'a str> {
        self.str_field("caller_id_name")
            .or_else(|| self.dialog_field("caller_id_name"))
    }

    pub fn caller_id_number(&self) -> Option<&'a str> {
        self.str_field("caller_id_number")
            .or_else(|| self.dialog_field("caller_id_number"))
    }

    pub fn callee_id_number(&self) -> Option<&'a str> {
        self.str_field("callee_id_number")
            .or_else(|| self.dialog_field("destination_number"))
    }

    /// Hangup cause name on a BYE.
    pub fn cause(&self) -> Option<&'a str> {
        self.str_field("cause")
    }

    pub fn cause_code(&self) -> Option<i64> {
        self.params.get("causeCode").and_then(Value::as_i64)
    }
}
