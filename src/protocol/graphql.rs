//! GraphQL requests as operations.
//!
//! The operation key is the request's operation name: `operationName` when
//! the client sends one, otherwise the name declared in the document
//! (`query GetUser { .. }`). Anonymous documents cannot be routed and are
//! rejected. The handler receives the `variables` object as its JSON body
//! and the document itself under the `x-graphql-query` header. Schema
//! execution is the handler's concern.

use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::context::Context;
use crate::error::Error;
use crate::response::{IntoResponse, Response};

use super::{Operation, Protocol, ProtocolAdapter};

/// Header under which the handler finds the GraphQL document.
pub const QUERY_HEADER: &str = "x-graphql-query";

/// A GraphQL-over-HTTP request body.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
    /// Transport headers forwarded as operation metadata.
    #[serde(skip)]
    pub headers: Vec<(String, String)>,
}

impl GraphQlRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }

    /// Parses a JSON request body. Malformed input is a `400`-class error.
    pub fn from_slice(body: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(body)
            .map_err(|e| Error::malformed(format!("invalid GraphQL request: {e}")))
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.get_or_insert_with(Map::new).insert(name.into(), value);
        self
    }

    /// The name the request is routed by.
    pub fn operation_name(&self) -> Option<&str> {
        match self.operation_name.as_deref() {
            Some(name) if !name.is_empty() => Some(name),
            _ => declared_name(&self.query),
        }
    }
}

/// Name of the first named operation definition in `document`.
fn declared_name(document: &str) -> Option<&str> {
    let mut rest = document.trim_start();
    loop {
        // Skip comment lines.
        if let Some(after) = rest.strip_prefix('#') {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
            continue;
        }
        let keyword_len = rest.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(rest.len());
        return match &rest[..keyword_len] {
            "query" | "mutation" | "subscription" => {
                let tail = rest[keyword_len..].trim_start();
                let name_len = tail
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(tail.len());
                let name = &tail[..name_len];
                (!name.is_empty() && !name.starts_with(|c: char| c.is_ascii_digit())).then_some(name)
            }
            _ => None,
        };
    }
}

/// One entry of a GraphQL `errors` list.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphQlError {
    pub message: String,
    pub extensions: ErrorExtensions,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorExtensions {
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
}

/// A GraphQL response envelope.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphQlResponse {
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
}

impl GraphQlResponse {
    fn error(message: impl Into<String>, code: &'static str, fields: Option<Value>) -> Self {
        Self {
            data: None,
            errors: vec![GraphQlError { message: message.into(), extensions: ErrorExtensions { code, fields } }],
        }
    }

    fn from_error(err: &Error) -> Self {
        let code = error_code(err);
        match err {
            Error::Validation(fields) => Self::error(err.to_string(), code, Some(json!(fields))),
            Error::Handler(_) | Error::Io(_) | Error::RouteConflict { .. } | Error::InvalidRoute { .. } => {
                Self::error("internal error", code, None)
            }
            _ => Self::error(err.to_string(), code, None),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// GraphQL over HTTP answers `200` with the errors in the body.
impl IntoResponse for GraphQlResponse {
    fn into_response(self) -> Response {
        Response::json_value(&self)
    }
}

/// GraphQL's conventional `extensions.code` for an error.
pub fn error_code(err: &Error) -> &'static str {
    match err.code() {
        "not_found" => "OPERATION_NOT_FOUND",
        "bad_request" => "GRAPHQL_PARSE_FAILED",
        "validation" => "BAD_USER_INPUT",
        "unauthorized" => "UNAUTHENTICATED",
        "cancelled" => "CANCELLED",
        _ => "INTERNAL_SERVER_ERROR",
    }
}

fn status_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::UNAUTHORIZED => "UNAUTHENTICATED",
        StatusCode::FORBIDDEN => "FORBIDDEN",
        StatusCode::NOT_FOUND => "OPERATION_NOT_FOUND",
        StatusCode::TOO_MANY_REQUESTS => "RATE_LIMITED",
        s if s.is_client_error() => "BAD_USER_INPUT",
        _ => "INTERNAL_SERVER_ERROR",
    }
}

/// Routes GraphQL requests by operation name.
#[derive(Clone, Copy, Debug, Default)]
pub struct GraphQl;

impl ProtocolAdapter for GraphQl {
    type Call = GraphQlRequest;
    type Reply = GraphQlResponse;

    fn protocol(&self) -> Protocol {
        Protocol::GraphQl
    }

    fn to_operation(&self, call: GraphQlRequest) -> Result<Operation, Error> {
        let Some(name) = call.operation_name().map(str::to_owned) else {
            return Err(Error::invalid("operationName", "anonymous operations cannot be routed"));
        };
        let variables = Value::Object(call.variables.unwrap_or_default());
        let payload = Bytes::from(serde_json::to_vec(&variables).unwrap_or_else(|_| b"{}".to_vec()));

        let mut op = Operation::new(Protocol::GraphQl, name, payload);
        op.metadata = call.headers;
        op.metadata.push((QUERY_HEADER.to_owned(), call.query));
        Ok(op)
    }

    /// Success puts the handler's JSON body under `data.{operation}`; a non-JSON
    /// body is passed as a string. Failures and error statuses become `errors`.
    fn from_operation(&self, ctx: Context) -> GraphQlResponse {
        if let Some(err) = ctx.failure() {
            return GraphQlResponse::from_error(err);
        }
        let response = ctx.response();
        if !response.status().is_success() {
            let message = response.status().canonical_reason().unwrap_or("request failed");
            return GraphQlResponse::error(message, status_code(response.status()), None);
        }

        let value = serde_json::from_slice(response.body())
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(response.body()).into_owned()));
        let mut data = Map::new();
        data.insert(ctx.request().operation().unwrap_or_default().to_owned(), value);
        GraphQlResponse { data: Some(Value::Object(data)), errors: Vec::new() }
    }
}
