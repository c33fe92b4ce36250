//! Structured request logging.
//!
//! Opens a `tracing` span per request carrying the request id, protocol,
//! method and path, so everything logged further down the chain is
//! attributed to its request. Logs status and latency on the way out.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, info, info_span, warn};

use crate::context::Context;
use crate::error::Error;

use super::{Middleware, Next};

/// Request logging middleware. Register it first so it sees every outcome.
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

#[async_trait]
impl Middleware for Trace {
    fn name(&self) -> &'static str {
        "trace"
    }

    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        let span = info_span!(
            "request",
            id = %ctx.id(),
            protocol = %ctx.protocol(),
            method = %ctx.method(),
            path = %ctx.path(),
        );
        let started = Instant::now();

        let result = next.run(ctx).instrument(span.clone()).await;

        let latency_us = started.elapsed().as_micros() as u64;
        span.in_scope(|| match &result {
            Ok(()) => info!(status = ctx.response().status().as_u16(), latency_us, "completed"),
            Err(Error::Cancelled) => info!(latency_us, "cancelled"),
            Err(e) => warn!(error = %e, status = e.status().as_u16(), latency_us, "failed"),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Chain, layer};
    use crate::{Method, Request, Response};

    #[tokio::test]
    async fn passes_results_through() {
        let ok = Chain::compose(vec![layer(Trace)], |_req: Request| async { Ok::<_, Error>(Response::text("hi")) });
        let mut ctx = Context::new(Method::Get, "/");
        assert!(ok.execute(&mut ctx).await.is_ok());
        assert_eq!(ctx.response().body().as_ref(), b"hi");

        let failing = Chain::compose(vec![layer(Trace)], |_req: Request| async { Err::<Response, _>(Error::handler("x")) });
        let mut ctx = Context::new(Method::Get, "/");
        assert!(matches!(failing.execute(&mut ctx).await, Err(Error::Handler(_))));
    }
}
