//! hyper 1.x transport.
//!
//! hyper owns the connection (HTTP/1.1 and HTTP/2 via `hyper-util`'s auto
//! builder, or HTTP/1.1 alone via [`http1`](super::http1)); this adapter only
//! converts between `http` types and [`Context`]. If hyper drops a request
//! future because the client went away, the in-flight context is cancelled
//! through a drop guard.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use tracing::warn;

use crate::context::Context;
use crate::error::Error;
use crate::method::Method;
use crate::pipeline::App;

use super::{Adapter, Limits};

/// Converts buffered `http` requests into contexts and back.
#[derive(Clone, Copy, Debug, Default)]
pub struct HyperAdapter;

impl Adapter for HyperAdapter {
    type Raw = http::Request<Bytes>;
    type Output = http::Response<Full<Bytes>>;

    fn to_context(&self, raw: http::Request<Bytes>) -> Context {
        let (parts, body) = raw.into_parts();
        let Some(method) = Method::from_http(&parts.method) else {
            return Context::malformed(format!("unknown method `{}`", parts.method));
        };

        let mut headers = Vec::with_capacity(parts.headers.len());
        for (name, value) in &parts.headers {
            let Ok(value) = value.to_str() else {
                return Context::malformed(format!("header `{name}` is not valid UTF-8"));
            };
            headers.push((name.as_str().to_owned(), value.to_owned()));
        }

        let target = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        Context::new(method, target)
            .with_headers(headers)
            .with_body(body)
    }

    fn from_context(&self, ctx: Context) -> Option<Self::Output> {
        if ctx.is_cancelled() || matches!(ctx.failure(), Some(Error::Cancelled)) {
            return None;
        }
        let response = ctx.response();
        let mut out = http::Response::new(Full::new(response.body().clone()));
        *out.status_mut() = response.status();
        for (name, value) in response.headers() {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    out.headers_mut().append(name, value);
                }
                _ => warn!(header = %name, "dropping response header that is not valid HTTP"),
            }
        }
        Some(out)
    }
}

impl HyperAdapter {
    /// Rebuilds the request a context was made from: method, target (query
    /// included), headers in order, and body.
    pub fn to_raw(&self, ctx: &Context) -> Result<http::Request<Bytes>, http::Error> {
        let mut builder = http::Request::builder()
            .method(ctx.method().as_str())
            .uri(ctx.target());
        for (name, value) in ctx.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(ctx.body().clone())
    }
}

/// hyper service body: one request in, one response out.
///
/// Infallible: every failure has already become a response by the time the
/// pipeline returns.
pub(crate) async fn serve_request(
    app: Arc<App>,
    limits: Limits,
    peer: Option<SocketAddr>,
    req: http::Request<Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let ctx = match Limited::new(body, limits.max_body_bytes).collect().await {
        Ok(collected) => HyperAdapter.to_context(http::Request::from_parts(parts, collected.to_bytes())),
        Err(e) if e.is::<LengthLimitError>() => {
            Context::malformed(format!("request body exceeds {} bytes", limits.max_body_bytes))
        }
        Err(e) => Context::malformed(format!("failed to read request body: {e}")),
    };
    let ctx = match peer {
        Some(peer) => ctx.with_peer(peer),
        None => ctx,
    };

    // Cancels the context if hyper drops this future before we respond.
    let guard = ctx.cancellation_token().drop_guard();
    let handled = tokio::spawn(async move { app.handle(ctx).await }).await;
    let _ = guard.disarm();

    let response = match handled {
        Ok(ctx) => HyperAdapter.from_context(ctx),
        Err(e) => {
            warn!(?peer, "request task failed: {e}");
            None
        }
    };
    // A cancellation the transport did not cause still needs an answer.
    Ok(response.unwrap_or_else(|| {
        let mut res = http::Response::new(Full::new(Bytes::new()));
        *res.status_mut() = http::StatusCode::SERVICE_UNAVAILABLE;
        res
    }))
}
