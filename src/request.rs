//! Read-only view of an inbound operation, handed to handlers.

use std::collections::HashMap;

use bytes::Bytes;
use http::Extensions;

use crate::auth::Identity;
use crate::method::Method;
use crate::protocol::Protocol;

/// What a handler sees: a snapshot of the context's inbound half.
///
/// The same type serves HTTP routes and GraphQL/gRPC operations. For an
/// operation, [`path`](Request::path) is `/` followed by the operation key and
/// [`body`](Request::body) is the decoded payload.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) protocol: Protocol,
    pub(crate) method: Method,
    pub(crate) path: String,
    /// The target as received, query included.
    pub(crate) target: String,
    pub(crate) query: HashMap<String, String>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
    pub(crate) user: Option<Identity>,
    pub(crate) extensions: Extensions,
}

impl Request {
    pub fn protocol(&self) -> Protocol { self.protocol }
    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn target(&self) -> &str { &self.target }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn params(&self) -> &HashMap<String, String> { &self.params }
    pub fn user(&self) -> Option<&Identity> { self.user.as_ref() }
    pub fn extensions(&self) -> &Extensions { &self.extensions }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header(&self.headers, name)
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns a decoded query parameter.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// The operation key for GraphQL/gRPC calls, `None` for HTTP.
    pub fn operation(&self) -> Option<&str> {
        match self.protocol {
            Protocol::Http => None,
            _ => Some(self.path.strip_prefix('/').unwrap_or(&self.path)),
        }
    }

    /// Deserialises the body as JSON, reporting failure as a validation error.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::Error> {
        serde_json::from_slice(&self.body).map_err(|e| crate::Error::invalid("body", e.to_string()))
    }
}

pub(crate) fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
