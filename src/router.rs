//! Segment-tree request router.
//!
//! One tree per routing key: an HTTP method, or a protocol tag for
//! GraphQL/gRPC operations. Each node has
//!
//! - static children, matched by exact segment text (highest priority),
//! - at most one `:param` child, which captures any non-empty segment,
//! - at most one trailing `*` wildcard, which captures the rest (lowest).
//!
//! Lookup walks the tree preferring static > param > wildcard and backtracks
//! when a preferred branch dead-ends deeper down, so `/users/me` and
//! `/users/:id` coexist without explicit priorities.
//!
//! Ambiguity is rejected at registration, never discovered at request time:
//! two patterns that differ only in parameter names, or that name the same
//! parameter position differently, are a [`Error::RouteConflict`].

use std::collections::{HashMap, HashSet};
use std::fmt;

use percent_encoding::percent_decode_str;

use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::middleware::{BoxedMiddleware, Chain, Middleware};
use crate::protocol::Protocol;

/// Capture name used for a bare trailing `*`.
pub const WILDCARD: &str = "*";

/// What a tree is keyed by: `(protocol, method)`.
///
/// HTTP routes use `Protocol::Http` and the request method. Operations use
/// their protocol tag with `Method::Post`, and `/{operation key}` as the path.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RouteKey {
    pub protocol: Protocol,
    pub method: Method,
}

impl RouteKey {
    pub fn http(method: Method) -> Self {
        Self { protocol: Protocol::Http, method }
    }

    pub fn operation(protocol: Protocol) -> Self {
        Self { protocol, method: Method::Post }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Protocol::Http => write!(f, "{}", self.method),
            other => write!(f, "{other}"),
        }
    }
}

/// A registered route: its pattern and the chain of route-bound middleware
/// wrapped around its handler.
pub struct Route {
    key: RouteKey,
    pattern: String,
    chain: Chain,
}

impl Route {
    pub fn key(&self) -> RouteKey { self.key }
    pub fn pattern(&self) -> &str { &self.pattern }
    pub fn chain(&self) -> &Chain { &self.chain }
}

/// A successful lookup.
pub struct Resolved<'r> {
    pub route: &'r Route,
    pub params: HashMap<String, String>,
}

// ── Pattern parsing ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    Wildcard(String),
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, Error> {
    let invalid = |reason: &str| Error::InvalidRoute {
        pattern: pattern.to_owned(),
        reason: reason.to_owned(),
    };

    if pattern.contains('?') {
        return Err(invalid("query strings are not part of a pattern"));
    }
    let Some(rest) = pattern.strip_prefix('/') else {
        return Err(invalid("pattern must start with `/`"));
    };
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    if rest.is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<&str> = rest.split('/').collect();
    let mut segments = Vec::with_capacity(raw.len());
    let mut names = HashSet::new();

    for (i, seg) in raw.iter().enumerate() {
        let segment = if seg.is_empty() {
            return Err(invalid("empty path segment"));
        } else if let Some(name) = seg.strip_prefix(':') {
            if name.is_empty() {
                return Err(invalid("parameter without a name"));
            }
            Segment::Param(name.to_owned())
        } else if let Some(name) = seg.strip_prefix('*') {
            if i + 1 != raw.len() {
                return Err(invalid("wildcard must be the last segment"));
            }
            Segment::Wildcard(if name.is_empty() { WILDCARD.to_owned() } else { name.to_owned() })
        } else {
            Segment::Static((*seg).to_owned())
        };

        if let Segment::Param(name) | Segment::Wildcard(name) = &segment {
            if !names.insert(name.clone()) {
                return Err(invalid("duplicate parameter name"));
            }
        }
        segments.push(segment);
    }
    Ok(segments)
}

/// Trailing slash dropped, query stripped. `None` if not an absolute path.
fn split_path(path: &str) -> Option<Vec<&str>> {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    let rest = path.strip_prefix('/')?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    if rest.is_empty() {
        return Some(Vec::new());
    }
    Some(rest.split('/').collect())
}

// ── Tree ──────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Node {
    statics: HashMap<String, Node>,
    param: Option<ParamChild>,
    wildcard: Option<(String, Route)>,
    route: Option<Route>,
}

struct ParamChild {
    name: String,
    /// First pattern that introduced this parameter, for conflict messages.
    origin: String,
    node: Box<Node>,
}

impl Node {
    /// Read-only pass: the pattern an insertion of `segments` would collide with.
    fn conflict(&self, segments: &[Segment]) -> Option<&str> {
        let Some((head, rest)) = segments.split_first() else {
            return self.route.as_ref().map(|r| r.pattern.as_str());
        };
        match head {
            Segment::Static(s) => self.statics.get(s)?.conflict(rest),
            Segment::Param(name) => {
                let child = self.param.as_ref()?;
                if &child.name != name {
                    return Some(child.origin.as_str());
                }
                child.node.conflict(rest)
            }
            Segment::Wildcard(_) => self.wildcard.as_ref().map(|(_, r)| r.pattern.as_str()),
        }
    }

    /// Infallible once `conflict` came back empty.
    fn insert(&mut self, segments: &[Segment], route: Route) {
        let Some((head, rest)) = segments.split_first() else {
            self.route = Some(route);
            return;
        };
        match head {
            Segment::Static(s) => self.statics.entry(s.clone()).or_default().insert(rest, route),
            Segment::Param(name) => {
                let child = self.param.get_or_insert_with(|| ParamChild {
                    name: name.clone(),
                    origin: route.pattern.clone(),
                    node: Box::default(),
                });
                child.node.insert(rest, route);
            }
            Segment::Wildcard(name) => self.wildcard = Some((name.clone(), route)),
        }
    }

    fn find<'n>(&'n self, segments: &[&str], params: &mut Vec<(&'n str, String)>) -> Option<&'n Route> {
        let Some((head, rest)) = segments.split_first() else {
            return self.route.as_ref();
        };

        if let Some(child) = self.statics.get(*head) {
            if let Some(route) = child.find(rest, params) {
                return Some(route);
            }
        }

        if let Some(child) = &self.param {
            if !head.is_empty() {
                params.push((child.name.as_str(), decode(head)));
                if let Some(route) = child.node.find(rest, params) {
                    return Some(route);
                }
                params.pop();
            }
        }

        if let Some((name, route)) = &self.wildcard {
            params.push((name.as_str(), decode(&segments.join("/"))));
            return Some(route);
        }

        None
    }

    fn routes<'n>(&'n self, out: &mut Vec<&'n Route>) {
        out.extend(self.route.as_ref());
        for child in self.statics.values() {
            child.routes(out);
        }
        if let Some(child) = &self.param {
            child.node.routes(out);
        }
        out.extend(self.wildcard.as_ref().map(|(_, r)| r));
    }
}

fn decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The application router.
///
/// Build it once at startup; after that it is only ever read, so concurrent
/// requests share it without locks. Each [`Router::on`] call returns `self`
/// so registrations chain naturally.
#[derive(Default)]
pub struct Router {
    trees: HashMap<RouteKey, Node>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method + pattern pair. Returns `self` for chaining.
    ///
    /// Path parameters use `:name`, a trailing `*` (or `*name`) captures the rest:
    ///
    /// ```rust
    /// # use strata::{Error, Method, Request, Response, Router};
    /// # async fn get_user(_: Request) -> Result<Response, Error> { Ok(Response::text("")) }
    /// # async fn create_user(_: Request) -> Result<Response, Error> { Ok(Response::text("")) }
    /// # async fn asset(_: Request) -> Result<Response, Error> { Ok(Response::text("")) }
    /// Router::new()
    ///     .on(Method::Get,  "/users/:id", get_user)
    ///     .on(Method::Post, "/users",     create_user)
    ///     .on(Method::Get,  "/assets/*",  asset);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics on an invalid or conflicting pattern. Routes are fixed at startup,
    /// so this fails the process before it serves anything; use
    /// [`register`](Router::register) to handle the error yourself.
    pub fn on(mut self, method: Method, pattern: &str, handler: impl Handler) -> Self {
        if let Err(e) = self.register(method, pattern, handler) {
            panic!("{e}");
        }
        self
    }

    pub fn get(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Get, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Post, pattern, handler)
    }

    pub fn put(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Put, pattern, handler)
    }

    pub fn patch(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Patch, pattern, handler)
    }

    pub fn delete(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Delete, pattern, handler)
    }

    /// Fallible registration.
    pub fn register(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, Error> {
        self.route(method, pattern).to(handler)
    }

    /// Starts a registration that carries route-bound middleware:
    ///
    /// ```rust
    /// # use std::sync::Arc;
    /// # use strata::{Error, Method, Request, Response, Router};
    /// # use strata::auth::StaticTokens;
    /// # use strata::middleware::auth::Auth;
    /// # async fn admin(_: Request) -> Result<Response, Error> { Ok(Response::text("")) }
    /// let mut router = Router::new();
    /// router.route(Method::Get, "/admin")
    ///     .layer(Auth::required(Arc::new(StaticTokens::new())))
    ///     .to(admin)?;
    /// # Ok::<(), Error>(())
    /// ```
    pub fn route(&mut self, method: Method, pattern: &str) -> RouteBuilder<'_> {
        RouteBuilder {
            router: self,
            key: RouteKey::http(method),
            pattern: pattern.to_owned(),
            layers: Vec::new(),
        }
    }

    pub(crate) fn insert(
        &mut self,
        key: RouteKey,
        pattern: &str,
        layers: Vec<BoxedMiddleware>,
        handler: BoxedHandler,
    ) -> Result<(), Error> {
        let segments = parse_pattern(pattern)?;
        let tree = self.trees.entry(key).or_default();
        if let Some(existing) = tree.conflict(&segments) {
            return Err(Error::RouteConflict {
                key: key.to_string(),
                pattern: pattern.to_owned(),
                existing: existing.to_owned(),
            });
        }
        let route = Route {
            key,
            pattern: pattern.to_owned(),
            chain: Chain::from_parts(layers, handler),
        };
        tree.insert(&segments, route);
        tracing::debug!(%key, pattern, "route registered");
        Ok(())
    }

    /// Resolves an HTTP method and path. The query string, if any, is ignored.
    pub fn resolve(&self, method: Method, path: &str) -> Result<Resolved<'_>, Error> {
        self.resolve_key(RouteKey::http(method), path)
    }

    pub(crate) fn resolve_key(&self, key: RouteKey, path: &str) -> Result<Resolved<'_>, Error> {
        let not_found = || Error::NotFound { path: path.to_owned() };
        let tree = self.trees.get(&key).ok_or_else(not_found)?;
        let segments = split_path(path).ok_or_else(not_found)?;

        let mut captured = Vec::new();
        let route = tree.find(&segments, &mut captured).ok_or_else(not_found)?;
        let params = captured.into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect();
        Ok(Resolved { route, params })
    }

    /// Exact lookup of a GraphQL/gRPC operation key. Keys are matched as
    /// given: no query stripping, no trailing-slash folding.
    pub(crate) fn resolve_operation(&self, protocol: Protocol, key: &str) -> Result<Resolved<'_>, Error> {
        let not_found = || Error::OperationNotFound { protocol, key: key.to_owned() };
        if key.is_empty() || key.contains(['/', '?']) {
            return Err(not_found());
        }
        let tree = self.trees.get(&RouteKey::operation(protocol)).ok_or_else(not_found)?;
        let route = tree.statics.get(key)
            .and_then(|node| node.route.as_ref())
            .ok_or_else(not_found)?;
        Ok(Resolved { route, params: HashMap::new() })
    }

    /// Every registered route, in no particular order.
    pub fn routes(&self) -> Vec<&Route> {
        let mut out = Vec::new();
        for tree in self.trees.values() {
            tree.routes(&mut out);
        }
        out
    }
}

/// Registration in progress; see [`Router::route`].
pub struct RouteBuilder<'r> {
    router: &'r mut Router,
    key: RouteKey,
    pattern: String,
    layers: Vec<BoxedMiddleware>,
}

impl<'r> RouteBuilder<'r> {
    /// Adds route-bound middleware. Runs inside every global middleware, in
    /// the order added.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(std::sync::Arc::new(middleware));
        self
    }

    pub fn to(self, handler: impl Handler) -> Result<&'r mut Router, Error> {
        self.router.insert(self.key, &self.pattern, self.layers, handler.into_boxed_handler())?;
        Ok(self.router)
    }
}
