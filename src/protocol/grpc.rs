//! gRPC calls as operations.
//!
//! A call's path `/{package.Service}/{Method}` becomes the operation key
//! `package.Service.Method`. The message bytes are handed to the handler
//! untouched: protobuf decoding belongs to generated code, not here. Call
//! metadata becomes request headers, response headers become reply metadata,
//! and the outcome is folded into a status [`Code`] for the trailers.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use http::StatusCode;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::context::Context;
use crate::error::Error;

use super::{Operation, Protocol, ProtocolAdapter};

/// `grpc-message` escapes controls, non-ASCII and `%` itself.
const MESSAGE_ESCAPE: &AsciiSet = &CONTROLS.add(b'%');

/// The gRPC status codes the pipeline can produce.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    NotFound = 5,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    Unauthenticated = 16,
}

impl Code {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::OperationNotFound { .. } => Self::Unimplemented,
            Error::NotFound { .. } => Self::NotFound,
            Error::Validation(_) | Error::Malformed(_) => Self::InvalidArgument,
            Error::Unauthorized => Self::Unauthenticated,
            Error::Cancelled => Self::Cancelled,
            _ => Self::Internal,
        }
    }

    /// For responses a middleware produced without failing the chain.
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            s if s.is_success() => Self::Ok,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Self::InvalidArgument,
            StatusCode::UNAUTHORIZED => Self::Unauthenticated,
            StatusCode::FORBIDDEN => Self::PermissionDenied,
            StatusCode::NOT_FOUND => Self::Unimplemented,
            StatusCode::TOO_MANY_REQUESTS => Self::ResourceExhausted,
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                Self::Unavailable
            }
            s if s.is_server_error() => Self::Internal,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok                => "OK",
            Self::Cancelled         => "CANCELLED",
            Self::Unknown           => "UNKNOWN",
            Self::InvalidArgument   => "INVALID_ARGUMENT",
            Self::NotFound          => "NOT_FOUND",
            Self::PermissionDenied  => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Unimplemented     => "UNIMPLEMENTED",
            Self::Internal          => "INTERNAL",
            Self::Unavailable       => "UNAVAILABLE",
            Self::Unauthenticated   => "UNAUTHENTICATED",
        };
        f.write_str(name)
    }
}

/// An inbound unary call.
#[derive(Clone, Debug)]
pub struct GrpcCall {
    /// `/{package.Service}/{Method}`.
    pub path: String,
    pub metadata: Vec<(String, String)>,
    /// The serialized request message, unframed.
    pub message: Bytes,
}

impl GrpcCall {
    pub fn new(path: impl Into<String>, message: impl Into<Bytes>) -> Self {
        Self { path: path.into(), metadata: Vec::new(), message: message.into() }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// The operation key for this call's path.
    pub fn key(&self) -> Result<String, Error> {
        let malformed = || Error::malformed(format!("bad gRPC path `{}`", self.path));
        let (service, method) = self.path
            .strip_prefix('/')
            .and_then(|p| p.split_once('/'))
            .ok_or_else(malformed)?;
        if service.is_empty() || method.is_empty() || method.contains('/') {
            return Err(malformed());
        }
        Ok(format!("{service}.{method}"))
    }
}

/// The outcome of a unary call.
#[derive(Clone, Debug, PartialEq)]
pub struct GrpcReply {
    pub code: Code,
    pub message: Option<String>,
    /// The serialized response message, unframed. Empty unless `code` is `Ok`.
    pub payload: Bytes,
    pub metadata: Vec<(String, String)>,
}

impl GrpcReply {
    fn failed(code: Code, message: impl Into<String>) -> Self {
        Self { code, message: Some(message.into()), payload: Bytes::new(), metadata: Vec::new() }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// `grpc-status` and, when set, the escaped `grpc-message`.
    pub fn trailers(&self) -> Vec<(String, String)> {
        let mut trailers = vec![("grpc-status".to_owned(), self.code.as_u8().to_string())];
        if let Some(message) = &self.message {
            trailers.push(("grpc-message".to_owned(), utf8_percent_encode(message, MESSAGE_ESCAPE).to_string()));
        }
        trailers
    }
}

/// Routes gRPC calls by `service.method`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Grpc;

impl ProtocolAdapter for Grpc {
    type Call = GrpcCall;
    type Reply = GrpcReply;

    fn protocol(&self) -> Protocol {
        Protocol::Grpc
    }

    fn to_operation(&self, call: GrpcCall) -> Result<Operation, Error> {
        let key = call.key()?;
        let mut op = Operation::new(Protocol::Grpc, key, call.message);
        op.metadata = call.metadata;
        Ok(op)
    }

    fn from_operation(&self, ctx: Context) -> GrpcReply {
        if let Some(err) = ctx.failure() {
            let message = match Code::from_error(err) {
                Code::Internal => "internal error".to_owned(),
                _ => err.to_string(),
            };
            return GrpcReply::failed(Code::from_error(err), message);
        }

        let response = ctx.response();
        let code = Code::from_status(response.status());
        if code != Code::Ok {
            let reason = response.status().canonical_reason().unwrap_or("request failed");
            return GrpcReply::failed(code, reason);
        }
        GrpcReply {
            code,
            message: None,
            payload: response.body().clone(),
            metadata: response.headers().iter()
                .filter(|(k, _)| !k.eq_ignore_ascii_case("content-type"))
                .cloned()
                .collect(),
        }
    }
}

/// Prefixes `message` with the 5-byte gRPC frame header (uncompressed).
pub fn encode_frame(message: &[u8]) -> Result<Bytes, Error> {
    let len = u32::try_from(message.len())
        .map_err(|_| Error::malformed("gRPC message too large"))?;
    let mut frame = BytesMut::with_capacity(5 + message.len());
    frame.put_u8(0);
    frame.put_u32(len);
    frame.put_slice(message);
    Ok(frame.freeze())
}

/// Strips the frame header from a single uncompressed gRPC message.
pub fn decode_frame(frame: &[u8]) -> Result<Bytes, Error> {
    let malformed = |reason: &str| Error::malformed(reason);
    let Some((header, body)) = frame.split_first_chunk::<5>() else {
        return Err(malformed("truncated gRPC frame header"));
    };
    if header[0] != 0 {
        return Err(malformed("compressed gRPC messages are not supported"));
    }
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if body.len() != len {
        return Err(malformed("gRPC frame length mismatch"));
    }
    Ok(Bytes::copy_from_slice(body))
}
