//! Middleware layer.
//!
//! Middleware wraps handler execution in an onion: each layer gets the
//! [`Context`] and a [`Next`] continuation, may work before calling it, after
//! it, or both, and may short-circuit by never calling it.
//!
//! ```text
//! A-enter → B-enter → C-enter → handler
//!                                  ↓
//! A-exit  ← B-exit  ← C-exit  ←────┘
//! ```
//!
//! A failed continuation comes back to the enclosing layer as `Err`; the layer
//! may recover by writing its own response and returning `Ok`, or return the
//! error to keep it moving outward.
//!
//! ```rust
//! use async_trait::async_trait;
//! use strata::{Context, Error};
//! use strata::middleware::{Middleware, Next};
//!
//! struct PoweredBy;
//!
//! #[async_trait]
//! impl Middleware for PoweredBy {
//!     fn name(&self) -> &'static str { "powered-by" }
//!
//!     async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
//!         next.run(ctx).await?;
//!         ctx.response_mut().set_header("x-powered-by", "strata");
//!         Ok(())
//!     }
//! }
//! ```
//!
//! Built-in middleware:
//! - [`trace`]: per-request `tracing` span with method, path, status, latency
//! - [`auth`]: `Authorization: Bearer` verification into [`Context::user`]
//! - [`validate`]: declarative JSON body checks with field-level errors
//! - [`rate_limit`]: fixed-window request limits per client

pub mod auth;
pub mod rate_limit;
pub mod trace;
pub mod validate;

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Error;
use crate::flow::{FlowTracker, Outcome, SpanId};
use crate::handler::{BoxedHandler, Handler};

/// One cross-cutting behaviour in the chain. Immutable once registered.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Label used for logs and flow spans.
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error>;
}

pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Label of the terminal stage's span.
pub const HANDLER_STAGE: &str = "handler";

/// The rest of the chain, from the caller's point of view.
///
/// Consumed by [`run`](Next::run), so a layer can enter its continuation at
/// most once.
pub struct Next<'a> {
    outer: &'a [BoxedMiddleware],
    inner: &'a [BoxedMiddleware],
    endpoint: &'a BoxedHandler,
    flow: &'a FlowTracker,
    parent: SpanId,
}

impl<'a> Next<'a> {
    /// `outer` layers run first, then `inner`, then the endpoint. The pipeline
    /// uses this to put global middleware around route-bound middleware.
    pub(crate) fn new(
        outer: &'a [BoxedMiddleware],
        inner: &'a [BoxedMiddleware],
        endpoint: &'a BoxedHandler,
        flow: &'a FlowTracker,
        parent: SpanId,
    ) -> Self {
        Self { outer, inner, endpoint, flow, parent }
    }

    /// Runs the next stage. A cancelled context stops here with
    /// [`Error::Cancelled`] and nothing deeper is entered.
    pub async fn run(self, ctx: &mut Context) -> Result<(), Error> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (layer, outer, inner) = match (self.outer.split_first(), self.inner.split_first()) {
            (Some((layer, outer)), _) => (Some(layer), outer, self.inner),
            (None, Some((layer, inner))) => (Some(layer), self.outer, inner),
            (None, None) => (None, self.outer, self.inner),
        };

        let Some(layer) = layer else {
            return self.call_endpoint(ctx).await;
        };

        let span = self.flow.start_span(Some(self.parent), layer.name());
        self.flow.tag(span, "stage", "middleware");
        let next = Next { outer, inner, endpoint: self.endpoint, flow: self.flow, parent: span };
        let result = layer.handle(ctx, next).await;
        self.close(span, ctx, &result);
        result
    }

    async fn call_endpoint(self, ctx: &mut Context) -> Result<(), Error> {
        let span = self.flow.start_span(Some(self.parent), HANDLER_STAGE);
        self.flow.tag(span, "stage", "handler");
        let result = self.endpoint.call(ctx.request().clone()).await
            .map(|response| ctx.set_response(response));
        self.close(span, ctx, &result);
        result
    }

    fn close(&self, span: SpanId, ctx: &Context, result: &Result<(), Error>) {
        if result.is_ok() {
            self.flow.tag(span, "status", ctx.response().status().as_str());
        }
        self.flow.end_span(span, Outcome::of(result));
    }
}

/// An ordered list of middleware composed around one endpoint.
#[derive(Clone)]
pub struct Chain {
    layers: Arc<[BoxedMiddleware]>,
    endpoint: BoxedHandler,
}

impl Chain {
    /// Composes `layers` (entered first to last) around `handler`.
    pub fn compose(layers: Vec<BoxedMiddleware>, handler: impl Handler) -> Self {
        Self::from_parts(layers, handler.into_boxed_handler())
    }

    pub(crate) fn from_parts(layers: Vec<BoxedMiddleware>, endpoint: BoxedHandler) -> Self {
        Self { layers: layers.into(), endpoint }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer names in entry order.
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|m| m.name()).collect()
    }

    pub(crate) fn layers(&self) -> &[BoxedMiddleware] {
        &self.layers
    }

    pub(crate) fn endpoint(&self) -> &BoxedHandler {
        &self.endpoint
    }

    /// Runs the chain against `ctx` without keeping a flow record.
    pub async fn execute(&self, ctx: &mut Context) -> Result<(), Error> {
        let flow = FlowTracker::new();
        let root = flow.start_span(None, "chain");
        self.execute_traced(ctx, &flow, root).await
    }

    /// Runs the chain, recording one span per stage under `parent`.
    pub async fn execute_traced(
        &self,
        ctx: &mut Context,
        flow: &FlowTracker,
        parent: SpanId,
    ) -> Result<(), Error> {
        Next::new(&[], &self.layers, &self.endpoint, flow, parent).run(ctx).await
    }
}

/// Boxes a middleware for [`Chain::compose`].
pub fn layer(middleware: impl Middleware) -> BoxedMiddleware {
    Arc::new(middleware)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, Request, Response, StatusCode};
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Marker {
        name: &'static str,
        log: Log,
    }

    #[async_trait]
    impl Middleware for Marker {
        fn name(&self) -> &'static str { self.name }

        async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
            self.log.lock().push(format!("{}-enter", self.name));
            let result = next.run(ctx).await;
            self.log.lock().push(format!("{}-exit", self.name));
            result
        }
    }

    struct Gate;

    #[async_trait]
    impl Middleware for Gate {
        fn name(&self) -> &'static str { "gate" }

        async fn handle(&self, ctx: &mut Context, _next: Next<'_>) -> Result<(), Error> {
            ctx.set_response(Response::with_status(StatusCode::FORBIDDEN));
            Ok(())
        }
    }

    struct Recover;

    #[async_trait]
    impl Middleware for Recover {
        fn name(&self) -> &'static str { "recover" }

        async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
            if let Err(e) = next.run(ctx).await {
                ctx.set_response(Response::builder().status(StatusCode::SERVICE_UNAVAILABLE).text(e.code()));
            }
            Ok(())
        }
    }

    fn marker(name: &'static str, log: &Log) -> BoxedMiddleware {
        layer(Marker { name, log: Arc::clone(log) })
    }

    fn logging_handler(log: &Log) -> impl Handler {
        let log = Arc::clone(log);
        move |_req: Request| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push("H".to_owned());
                Ok::<_, Error>(Response::text("done"))
            }
        }
    }

    #[tokio::test]
    async fn enters_in_order_and_exits_in_reverse() {
        let log = Log::default();
        let chain = Chain::compose(
            vec![marker("A", &log), marker("B", &log), marker("C", &log)],
            logging_handler(&log),
        );

        let mut ctx = Context::new(Method::Get, "/");
        chain.execute(&mut ctx).await.unwrap();

        assert_eq!(
            *log.lock(),
            ["A-enter", "B-enter", "C-enter", "H", "C-exit", "B-exit", "A-exit"],
        );
        assert_eq!(ctx.response().body().as_ref(), b"done");
    }

    #[tokio::test]
    async fn short_circuit_skips_the_rest() {
        let log = Log::default();
        let chain = Chain::compose(
            vec![marker("A", &log), layer(Gate), marker("C", &log)],
            logging_handler(&log),
        );

        let mut ctx = Context::new(Method::Get, "/");
        chain.execute(&mut ctx).await.unwrap();

        assert_eq!(*log.lock(), ["A-enter", "A-exit"]);
        assert_eq!(ctx.response().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn failure_unwinds_until_recovered() {
        let log = Log::default();
        let failing = |_req: Request| async { Err::<Response, _>(Error::handler("boom")) };
        let chain = Chain::compose(
            vec![marker("A", &log), layer(Recover), marker("C", &log)],
            failing,
        );

        let mut ctx = Context::new(Method::Get, "/");
        chain.execute(&mut ctx).await.unwrap();

        assert_eq!(*log.lock(), ["A-enter", "C-enter", "C-exit", "A-exit"]);
        assert_eq!(ctx.response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unrecovered_failure_reaches_the_caller() {
        let failing = |_req: Request| async { Err::<Response, _>(Error::Unauthorized) };
        let chain = Chain::compose(Vec::new(), failing);
        let mut ctx = Context::new(Method::Get, "/");
        assert!(matches!(chain.execute(&mut ctx).await, Err(Error::Unauthorized)));
    }

    #[tokio::test]
    async fn spans_mirror_the_onion() {
        let log = Log::default();
        let chain = Chain::compose(
            vec![marker("A", &log), marker("B", &log), marker("C", &log)],
            logging_handler(&log),
        );

        let flow = FlowTracker::new();
        let root = flow.start_span(None, "GET /");
        let mut ctx = Context::new(Method::Get, "/");
        chain.execute_traced(&mut ctx, &flow, root).await.unwrap();
        flow.end_span(root, Outcome::Ok);
        let tree = flow.finish();

        assert_eq!(tree.depth(), 4);
        assert_eq!(tree.stages(), ["A", "B", "C", HANDLER_STAGE]);
        assert_eq!(tree.spans()[4].tag("status"), Some("200"));
    }

    #[tokio::test]
    async fn cancelled_context_enters_nothing() {
        let log = Log::default();
        let chain = Chain::compose(vec![marker("A", &log)], logging_handler(&log));
        let mut ctx = Context::new(Method::Get, "/");
        ctx.cancellation_token().cancel();

        assert!(matches!(chain.execute(&mut ctx).await, Err(Error::Cancelled)));
        assert!(log.lock().is_empty());
    }
}
