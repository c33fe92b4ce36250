//! Request pipeline: resolve, run the chain, settle the outcome.
//!
//! [`Pipeline`] holds what every request shares (global middleware, flow
//! exporters). [`App`] pairs it with the HTTP [`Router`]; the
//! [`ProtocolManager`](crate::protocol::ProtocolManager) pairs the same
//! pipeline with its operation router. Both go through [`Pipeline::run`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, error};

use crate::context::Context;
use crate::error::Error;
use crate::flow::{FlowExporter, FlowTracker, Outcome, SpanTree};
use crate::handler::{BoxedHandler, Rejected, Unmatched};
use crate::middleware::{BoxedMiddleware, Middleware, Next};
use crate::router::{RouteKey, Router};

/// Global middleware and flow exporters.
pub struct Pipeline {
    layers: Vec<BoxedMiddleware>,
    exporters: Vec<Arc<dyn FlowExporter>>,
    unmatched: BoxedHandler,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { layers: Vec::new(), exporters: Vec::new(), unmatched: Arc::new(Unmatched) }
    }

    /// Appends a global middleware. The first one added is the outermost.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    pub fn exporter(mut self, exporter: impl FlowExporter) -> Self {
        self.exporters.push(Arc::new(exporter));
        self
    }

    /// Global middleware names in entry order.
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|m| m.name()).collect()
    }

    /// Resolves `ctx` against `router` and drives the chain to completion.
    ///
    /// Never fails: an unrecovered error is recorded on the returned context
    /// and rendered as its response. A panic anywhere in the chain is caught
    /// here and treated as a handler failure.
    pub async fn run(&self, router: &Router, mut ctx: Context) -> (Context, SpanTree) {
        let key = RouteKey { protocol: ctx.protocol(), method: ctx.method() };
        let flow = FlowTracker::new();
        let root = flow.start_span(None, format!("{key} {}", ctx.path()));
        flow.tag(root, "request_id", ctx.id().to_string());

        let mut inner: &[BoxedMiddleware] = &[];
        let endpoint = match ctx.take_rejection() {
            Some(reason) => Arc::new(Rejected(reason)) as BoxedHandler,
            None => match match ctx.request().operation() {
                Some(op) => router.resolve_operation(ctx.protocol(), op),
                None => router.resolve_key(key, ctx.path()),
            } {
                Ok(resolved) => {
                    flow.tag(root, "route", resolved.route.pattern());
                    ctx.set_params(resolved.params);
                    inner = resolved.route.chain().layers();
                    Arc::clone(resolved.route.chain().endpoint())
                }
                Err(_) => Arc::clone(&self.unmatched),
            },
        };

        let next = Next::new(&self.layers, inner, &endpoint, &flow, root);
        let caught = AssertUnwindSafe(next.run(&mut ctx)).catch_unwind().await;
        let result = caught.unwrap_or_else(|_| {
            error!(id = %ctx.id(), "chain panicked");
            let err = Error::handler("panicked");
            flow.end_open(root, Outcome::Failed(err.code().to_owned()));
            Err(err)
        });

        let outcome = Outcome::of(&result);
        if let Err(err) = result {
            match &err {
                Error::Cancelled => debug!(id = %ctx.id(), "request cancelled, no response"),
                e if e.status().is_server_error() => {
                    error!(id = %ctx.id(), error = %e, "unrecovered failure")
                }
                e => debug!(id = %ctx.id(), error = %e, "request rejected"),
            }
            ctx.fail(err);
        }
        if outcome != Outcome::Cancelled {
            flow.tag(root, "status", ctx.response().status().as_str());
        }
        flow.end_span(root, outcome);

        let tree = flow.finish();
        for exporter in &self.exporters {
            exporter.export(&tree);
        }
        (ctx, tree)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// An HTTP application: the router plus the shared pipeline.
///
/// Built once at startup and shared read-only by every connection.
pub struct App {
    router: Router,
    pipeline: Arc<Pipeline>,
}

impl App {
    /// An app with no global middleware.
    pub fn new(router: Router) -> Self {
        Self::with_pipeline(router, Arc::new(Pipeline::new()))
    }

    pub fn with_pipeline(router: Router, pipeline: Arc<Pipeline>) -> Self {
        Self { router, pipeline }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Runs one request. The returned context is finished: its response is
    /// final, or it was cancelled and nothing should be emitted.
    pub async fn handle(&self, ctx: Context) -> Context {
        self.handle_traced(ctx).await.0
    }

    /// Like [`handle`](App::handle), also returning the request's span tree.
    pub async fn handle_traced(&self, ctx: Context) -> (Context, SpanTree) {
        self.pipeline.run(&self.router, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, Request, Response, StatusCode};

    async fn user(req: Request) -> Result<Response, Error> {
        let id = req.param("id").unwrap_or_default().to_owned();
        Ok(Response::json_value(&serde_json::json!({ "id": id })))
    }

    async fn boom(_: Request) -> Result<Response, Error> {
        panic!("handler bug")
    }

    fn app() -> App {
        App::new(Router::new().get("/users/:id", user).get("/boom", boom))
    }

    #[tokio::test]
    async fn resolves_params_onto_context() {
        let ctx = app().handle(Context::new(Method::Get, "/users/42")).await;
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.response().body().as_ref(), br#"{"id":"42"}"#);
        assert!(ctx.failure().is_none());
    }

    #[tokio::test]
    async fn unmatched_path_is_404() {
        let ctx = app().handle(Context::new(Method::Get, "/nope")).await;
        assert_eq!(ctx.response().status(), StatusCode::NOT_FOUND);
        assert!(matches!(ctx.failure(), Some(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn malformed_context_is_400() {
        let ctx = app().handle(Context::malformed("bad request line")).await;
        assert_eq!(ctx.response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn panics_become_500() {
        let (ctx, tree) = app().handle_traced(Context::new(Method::Get, "/boom")).await;
        assert_eq!(ctx.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(tree.root().and_then(|r| r.tag("status")), Some("500"));
        assert_eq!(tree.spans().len(), 2);
        let failed = Outcome::Failed("internal".to_owned());
        assert!(tree.spans().iter().all(|s| s.outcome() == Some(&failed)), "{:?}", tree.spans());
    }

    #[tokio::test]
    async fn cancelled_request_has_no_status() {
        let ctx = Context::new(Method::Get, "/users/1");
        ctx.cancellation_token().cancel();
        let (ctx, tree) = app().handle_traced(ctx).await;
        assert!(matches!(ctx.failure(), Some(Error::Cancelled)));
        assert_eq!(tree.root().and_then(|r| r.outcome()), Some(&Outcome::Cancelled));
        assert_eq!(tree.spans().len(), 1);
    }
}
