//! HTTP/1.1 over any byte stream.
//!
//! hyper's HTTP/1 connection does the framing: keep-alive, pipelining,
//! chunked bodies, and a bare `400` for heads it cannot parse. Each request it
//! yields goes through [`HyperAdapter`](super::hyper::HyperAdapter), the same
//! as on [`Transport::Hyper`](crate::server::Transport). Taking any
//! `AsyncRead + AsyncWrite` lets the transport run over in-memory streams too.
//!
//! # Half-closed connections
//!
//! EOF on the read side while a request is in flight means the client is
//! gone: the context is cancelled and nothing is written. A client that shuts
//! down its write half after sending a request therefore gets no response.
//! This is hyper's `half_close(false)`, kept so slow handlers can notice a
//! vanished peer.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::Error;
use crate::pipeline::App;

use super::Limits;
use super::hyper::serve_request;

/// hyper refuses a smaller read buffer.
const MIN_BUF_SIZE: usize = 8 * 1024;

/// Serves HTTP/1.1 requests on `stream` until the peer closes it or asks to
/// close. A peer that hangs up mid-request is not an error.
pub async fn serve_connection<S>(
    stream: S,
    app: Arc<App>,
    peer: Option<SocketAddr>,
    limits: Limits,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Called once per request on the connection, not once per connection.
    let svc = service_fn(move |req| serve_request(Arc::clone(&app), limits, peer, req));

    let served = http1::Builder::new()
        .keep_alive(true)
        .half_close(false)
        .max_buf_size(limits.max_head_bytes.max(MIN_BUF_SIZE))
        .serve_connection(TokioIo::new(stream), svc)
        .await;

    match served {
        Ok(()) => Ok(()),
        Err(e) if e.is_incomplete_message() => {
            debug!(?peer, "peer went away mid-request");
            Ok(())
        }
        Err(e) => Err(io::Error::other(e).into()),
    }
}
