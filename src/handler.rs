//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in one tree, and the
//! protocol manager holds more of them in another. Rust collections can only
//! hold one concrete type, so the concrete handler hides behind a trait object
//! (`dyn ErasedHandler`).
//!
//! ```text
//! async fn get_user(req: Request) -> Result<Response, Error> { … }
//!        ↓ router.on(Method::Get, "/users/:id", get_user)
//! get_user.into_boxed_handler()                    ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(get_user))                    ← stored as BoxedHandler
//!        ↓
//! handler.call(req) at request time                ← one vtable dispatch
//! ```
//!
//! The same `BoxedHandler` serves an HTTP route and a GraphQL/gRPC operation:
//! handlers never learn which transport or protocol the request came from
//! unless they ask [`Request::protocol`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A heap-allocated, type-erased future.
///
/// `Send` lets tokio move it across worker threads; `'a` lets middleware
/// futures borrow the context they run against.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Error>>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid route or operation handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(req: Request) -> Result<impl IntoResponse, Error>
/// ```
///
/// Returning `Err` fails the stage: the error travels outward through the
/// middleware chain, where any layer may recover it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler `F` to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Error>> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.map(IntoResponse::into_response) })
    }
}

/// Endpoint used when resolution fails: it fails with the resolution error so
/// global middleware (logging, tracing) still observe unmatched requests.
pub(crate) struct Unmatched;

impl ErasedHandler for Unmatched {
    fn call(&self, req: Request) -> BoxFuture<'static, Result<Response, Error>> {
        let err = match req.operation() {
            Some(key) => Error::OperationNotFound { protocol: req.protocol(), key: key.to_owned() },
            None => Error::NotFound { path: req.path().to_owned() },
        };
        Box::pin(async move { Err(err) })
    }
}

/// Endpoint for input an adapter already rejected.
pub(crate) struct Rejected(pub(crate) String);

impl ErasedHandler for Rejected {
    fn call(&self, _req: Request) -> BoxFuture<'static, Result<Response, Error>> {
        let err = Error::malformed(self.0.clone());
        Box::pin(async move { Err(err) })
    }
}
