//! Unified error type.
//!
//! Registration errors abort start-up. Request-time errors travel outward
//! through the middleware chain; whatever is left when the chain returns is
//! turned into a response with [`Error::into_response`].

use serde::Serialize;
use serde_json::json;

use crate::protocol::Protocol;
use crate::response::Response;

/// The error type returned by strata's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two patterns registered under the same key would match the same paths.
    #[error("route `{pattern}` conflicts with `{existing}` for {key}")]
    RouteConflict {
        key: String,
        pattern: String,
        existing: String,
    },

    /// A pattern or operation key that can never be registered.
    #[error("invalid route `{pattern}`: {reason}")]
    InvalidRoute { pattern: String, reason: String },

    #[error("no route for `{path}`")]
    NotFound { path: String },

    #[error("no {protocol} operation `{key}`")]
    OperationNotFound { protocol: Protocol, key: String },

    /// Input that could not be read at all: an unparseable request, a
    /// protocol frame that does not decode, a body over the size limit.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Rejected input, with one entry per offending field.
    #[error("validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("authentication required")]
    Unauthorized,

    /// A handler or middleware failed with a message meant for logs only.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The transport went away before the chain completed.
    #[error("request cancelled")]
    Cancelled,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// One rejected field of a [`Error::Validation`] failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

impl Error {
    /// Shorthand for a single-field validation failure.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Machine-readable code shared by every protocol mapping.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RouteConflict { .. } | Self::InvalidRoute { .. } => "internal",
            Self::NotFound { .. } | Self::OperationNotFound { .. } => "not_found",
            Self::Malformed(_) => "bad_request",
            Self::Validation(_) => "validation",
            Self::Unauthorized => "unauthorized",
            Self::Handler(_) | Self::Io(_) => "internal",
            Self::Cancelled => "cancelled",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> http::StatusCode {
        match self.code() {
            "not_found" => http::StatusCode::NOT_FOUND,
            "bad_request" => http::StatusCode::BAD_REQUEST,
            "validation" => http::StatusCode::UNPROCESSABLE_ENTITY,
            "unauthorized" => http::StatusCode::UNAUTHORIZED,
            // Nginx's non-standard "client closed request"; never emitted.
            "cancelled" => http::StatusCode::from_u16(499).unwrap_or(http::StatusCode::BAD_REQUEST),
            _ => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON error response. Internal failures never leak their message.
    pub fn into_response(&self) -> Response {
        let body = match self {
            Self::Validation(fields) => json!({ "error": self.code(), "fields": fields }),
            Self::NotFound { .. }
            | Self::OperationNotFound { .. }
            | Self::Malformed(_)
            | Self::Unauthorized => {
                json!({ "error": self.code(), "message": self.to_string() })
            }
            _ => json!({ "error": self.code() }),
        };
        Response::builder().status(self.status()).json_value(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status() {
        assert_eq!(Error::NotFound { path: "/x".into() }.status(), 404);
        assert_eq!(Error::invalid("name", "required").status(), 422);
        assert_eq!(Error::malformed("bad head").status(), 400);
        assert_eq!(Error::Unauthorized.status(), 401);
        assert_eq!(Error::handler("db down").status(), 500);
    }

    #[test]
    fn field_names_do_not_change_the_code() {
        let err = Error::invalid("request", "required");
        assert_eq!(err.code(), "validation");
        assert_eq!(err.status(), 422);
        assert_eq!(Error::malformed("truncated frame").code(), "bad_request");
    }

    #[test]
    fn internal_message_is_not_leaked() {
        let res = Error::handler("password=hunter2").into_response();
        let body = String::from_utf8(res.body().to_vec()).unwrap();
        assert!(!body.contains("hunter2"));
        assert_eq!(res.header("content-type"), Some("application/json"));
    }

    #[test]
    fn validation_lists_fields() {
        let err = Error::Validation(vec![
            FieldError::new("name", "required"),
            FieldError::new("age", "expected number"),
        ]);
        let body: serde_json::Value = serde_json::from_slice(err.into_response().body()).unwrap();
        assert_eq!(body["fields"][1]["field"], "age");
    }
}
