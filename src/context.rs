//! Per-operation state shared by every middleware and the handler.
//!
//! A [`Context`] is built once by a transport adapter or the protocol manager,
//! threaded by `&mut` through the chain, then moved back to whoever built it.
//! It is never shared between requests, so it carries no locks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use http::Extensions;
use percent_encoding::percent_decode_str;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::Error;
use crate::method::Method;
use crate::protocol::Protocol;
use crate::request::Request;
use crate::response::Response;

/// Mutable state for one in-flight operation.
#[derive(Debug)]
pub struct Context {
    id: Uuid,
    started_at: Instant,
    peer: Option<SocketAddr>,
    request: Request,
    response: Response,
    cancel: CancellationToken,
    /// Set by an adapter that could not make sense of its input.
    rejection: Option<String>,
    /// The chain's unrecovered failure, if any.
    failure: Option<Error>,
}

impl Context {
    /// A fresh HTTP context for `method` and a request target (`/path?query`).
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, HashMap::new()),
        };
        Self::with_parts(Protocol::Http, method, path.to_owned(), target.to_owned(), query)
    }

    /// A context for a protocol operation. The operation key becomes the path.
    pub(crate) fn for_operation(protocol: Protocol, key: &str) -> Self {
        let path = format!("/{key}");
        Self::with_parts(protocol, Method::Post, path.clone(), path, HashMap::new())
    }

    /// A context whose resolution fails with a well-defined `400`.
    ///
    /// Adapters use this instead of surfacing raw parse errors.
    pub fn malformed(reason: impl Into<String>) -> Self {
        let mut ctx = Self::with_parts(Protocol::Http, Method::Get, "/".to_owned(), "/".to_owned(), HashMap::new());
        ctx.rejection = Some(reason.into());
        ctx
    }

    fn with_parts(
        protocol: Protocol,
        method: Method,
        path: String,
        target: String,
        query: HashMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
            peer: None,
            request: Request {
                protocol,
                method,
                path,
                target,
                query,
                headers: Vec::new(),
                body: Bytes::new(),
                params: HashMap::new(),
                user: None,
                extensions: Extensions::new(),
            },
            response: Response::default(),
            cancel: CancellationToken::new(),
            rejection: None,
            failure: None,
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.request.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = body.into();
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    // ── inbound half ─────────────────────────────────────────────────────────

    pub fn id(&self) -> Uuid { self.id }
    pub fn started_at(&self) -> Instant { self.started_at }
    pub fn peer(&self) -> Option<SocketAddr> { self.peer }
    pub fn protocol(&self) -> Protocol { self.request.protocol }
    pub fn method(&self) -> Method { self.request.method }
    pub fn path(&self) -> &str { &self.request.path }
    /// The request target as the transport received it, `?query` included.
    pub fn target(&self) -> &str { &self.request.target }
    pub fn body(&self) -> &Bytes { &self.request.body }
    pub fn headers(&self) -> &[(String, String)] { &self.request.headers }
    pub fn params(&self) -> &HashMap<String, String> { &self.request.params }
    pub fn query(&self) -> &HashMap<String, String> { &self.request.query }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.request.param(key)
    }

    pub fn headers_mut(&mut self) -> &mut Vec<(String, String)> {
        &mut self.request.headers
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.request.body = body.into();
    }

    /// Snapshot handed to the handler.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.request.params = params;
    }

    // ── middleware state ─────────────────────────────────────────────────────

    /// The authenticated caller, present only after successful verification.
    pub fn user(&self) -> Option<&Identity> {
        self.request.user.as_ref()
    }

    pub fn set_user(&mut self, user: Identity) {
        self.request.user = Some(user);
    }

    /// Typed slot for any other middleware-attached state.
    pub fn extensions(&self) -> &Extensions {
        &self.request.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.request.extensions
    }

    // ── outbound half ────────────────────────────────────────────────────────

    pub fn response(&self) -> &Response { &self.response }
    pub fn response_mut(&mut self) -> &mut Response { &mut self.response }

    pub fn set_response(&mut self, response: Response) {
        self.response = response;
    }

    /// The unrecovered failure the chain ended with, if any.
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    /// Records an unrecovered failure and replaces the response with its
    /// error rendering. Cancellation leaves the response untouched: nothing
    /// will be emitted.
    pub(crate) fn fail(&mut self, err: Error) {
        if !matches!(err, Error::Cancelled) {
            self.response = err.into_response();
        }
        self.failure = Some(err);
    }

    /// The response, or the failure that replaced it.
    pub fn into_result(self) -> Result<Response, Error> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.response),
        }
    }

    pub(crate) fn take_rejection(&mut self) -> Option<String> {
        self.rejection.take()
    }

    // ── cancellation ─────────────────────────────────────────────────────────

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the originating transport has gone away.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// A handle adapters keep to signal cancellation into the in-flight context.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Splits `a=1&b=two%20words` into decoded pairs. Later duplicates win.
pub(crate) fn parse_query(query: &str) -> HashMap<String, String> {
    query.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (!k.is_empty()).then(|| (decode(k), decode(v)))
        })
        .collect()
}

fn decode(s: &str) -> String {
    let s = s.replace('+', " ");
    percent_decode_str(&s).decode_utf8_lossy().into_owned()
}
