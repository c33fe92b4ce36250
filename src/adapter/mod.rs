//! Transport adapters.
//!
//! An [`Adapter`] is the only code that knows what a transport's requests
//! and responses look like. It builds a [`Context`] from raw input and turns
//! the finished context back into raw output; routing and middleware only
//! ever see the context.
//!
//! Both transports that ship with strata read requests with hyper and share
//! one adapter:
//!
//! | Transport | Connection | Adapter |
//! |---|---|---|
//! | [`Transport::Hyper`](crate::server::Transport) | `hyper-util` auto, HTTP/1.1 and HTTP/2 | [`HyperAdapter`](self::hyper::HyperAdapter) |
//! | [`Transport::Http1`](crate::server::Transport) | [`http1::serve_connection`](self::http1::serve_connection), any byte stream | [`HyperAdapter`](self::hyper::HyperAdapter) |

pub mod http1;
pub mod hyper;

use crate::context::Context;

/// Two-way translation between a transport and [`Context`].
pub trait Adapter {
    type Raw;
    type Output;

    /// Never fails. Input the adapter cannot make sense of yields a context
    /// built with [`Context::malformed`], which the pipeline answers with `400`.
    fn to_context(&self, raw: Self::Raw) -> Context;

    /// The transport's response for a finished context, failed or not.
    /// `None` means the request was cancelled and nothing may be written.
    fn from_context(&self, ctx: Context) -> Option<Self::Output>;
}

/// Size limits applied while reading a request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Limits {
    /// Read buffer for the request head on [`http1`](self::http1). hyper
    /// answers a larger head with `431`. Values under 8 KiB are raised to it.
    pub max_head_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_head_bytes: 8 * 1024, max_body_bytes: 1024 * 1024 }
    }
}
