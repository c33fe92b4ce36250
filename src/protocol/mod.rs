//! GraphQL and gRPC through the HTTP pipeline.
//!
//! A [`ProtocolAdapter`] turns one protocol's call into an [`Operation`]
//! and a finished [`Context`] back into that protocol's reply. The
//! [`ProtocolManager`] owns a [`Router`] keyed by protocol tag and runs
//! every operation through the same [`Pipeline`] HTTP requests use, so
//! middleware written for HTTP (auth, rate limits, tracing) applies unchanged.
//!
//! ```text
//! GraphQlRequest ─┐                          ┌─> GraphQlResponse
//!                 ├─> Operation ─> Context ─> pipeline ─┤
//! GrpcCall ───────┘                          └─> GrpcReply
//! ```

pub mod graphql;
pub mod grpc;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::context::Context;
use crate::error::Error;
use crate::handler::Handler;
use crate::middleware::BoxedMiddleware;
use crate::pipeline::Pipeline;
use crate::response::Response;
use crate::router::{RouteKey, Router};

/// Which protocol family a request belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    GraphQl,
    Grpc,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http    => "http",
            Self::GraphQl => "graphql",
            Self::Grpc    => "grpc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol-neutral unit of work.
#[derive(Clone, Debug)]
pub struct Operation {
    pub protocol: Protocol,
    /// The matching key: `service.method` for gRPC, the operation name for GraphQL.
    pub name: String,
    /// The decoded request message or variables.
    pub payload: Bytes,
    /// Call metadata. Exposed to middleware and handlers as request headers.
    pub metadata: Vec<(String, String)>,
}

impl Operation {
    pub fn new(protocol: Protocol, name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self { protocol, name: name.into(), payload: payload.into(), metadata: Vec::new() }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// The context the pipeline runs: path `/{name}`, body = payload.
    pub fn into_context(self) -> Context {
        Context::for_operation(self.protocol, &self.name)
            .with_headers(self.metadata)
            .with_body(self.payload)
    }
}

/// Translation between one protocol's wire-level call and an [`Operation`].
///
/// Implementations are selected by the caller, never inferred from the shape
/// of the input.
pub trait ProtocolAdapter {
    type Call;
    type Reply;

    fn protocol(&self) -> Protocol;

    /// Fails when the call cannot name an operation.
    fn to_operation(&self, call: Self::Call) -> Result<Operation, Error>;

    /// Builds the reply from a finished context, failed or not.
    fn from_operation(&self, ctx: Context) -> Self::Reply;
}

/// Registry and dispatcher for GraphQL and gRPC operations.
pub struct ProtocolManager {
    router: Router,
    pipeline: Arc<Pipeline>,
}

impl ProtocolManager {
    /// Operations run inside `pipeline`'s global middleware. Pass the HTTP
    /// app's pipeline to share it.
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { router: Router::new(), pipeline }
    }

    /// Registers `handler` for `key` under `protocol`.
    ///
    /// Keys are single opaque segments: `helloworld.Greeter.SayHello`,
    /// `GetUser`. A second registration of the same key is a
    /// [`Error::RouteConflict`].
    pub fn register_operation(
        &mut self,
        protocol: Protocol,
        key: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, Error> {
        self.register_operation_with(protocol, key, Vec::new(), handler)
    }

    /// Like [`register_operation`](Self::register_operation), with
    /// operation-bound middleware.
    pub fn register_operation_with(
        &mut self,
        protocol: Protocol,
        key: &str,
        layers: Vec<BoxedMiddleware>,
        handler: impl Handler,
    ) -> Result<&mut Self, Error> {
        check_key(protocol, key)?;
        self.router.insert(
            RouteKey::operation(protocol),
            &format!("/{key}"),
            layers,
            handler.into_boxed_handler(),
        )?;
        Ok(self)
    }

    /// Runs the operation registered for `(protocol, key)` with `payload`.
    ///
    /// An unknown key fails with [`Error::OperationNotFound`]. Any other
    /// unrecovered chain failure is returned as is.
    pub async fn dispatch(
        &self,
        protocol: Protocol,
        key: &str,
        payload: impl Into<Bytes>,
    ) -> Result<Response, Error> {
        if protocol == Protocol::Http {
            return Err(Error::OperationNotFound { protocol, key: key.to_owned() });
        }
        self.execute(Operation::new(protocol, key, payload)).await.into_result()
    }

    /// Runs `op` through the pipeline and returns the finished context.
    pub async fn execute(&self, op: Operation) -> Context {
        self.pipeline.run(&self.router, op.into_context()).await.0
    }

    /// Full round trip through a protocol adapter.
    pub async fn invoke<A: ProtocolAdapter>(&self, adapter: &A, call: A::Call) -> A::Reply {
        match adapter.to_operation(call) {
            Ok(op) => adapter.from_operation(self.execute(op).await),
            Err(err) => {
                tracing::debug!(protocol = %adapter.protocol(), error = %err, "call rejected");
                let mut ctx = Context::for_operation(adapter.protocol(), "");
                ctx.fail(err);
                adapter.from_operation(ctx)
            }
        }
    }

    /// Registered operation keys for `protocol`.
    pub fn operations(&self, protocol: Protocol) -> Vec<&str> {
        self.router.routes().into_iter()
            .filter(|r| r.key() == RouteKey::operation(protocol))
            .map(|r| r.pattern().trim_start_matches('/'))
            .collect()
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }
}

impl Default for ProtocolManager {
    fn default() -> Self {
        Self::new(Arc::new(Pipeline::new()))
    }
}

fn check_key(protocol: Protocol, key: &str) -> Result<(), Error> {
    let reason = if protocol == Protocol::Http {
        Some("HTTP routes belong on the router")
    } else if key.is_empty() {
        Some("operation key is empty")
    } else if key.contains(['/', '?']) {
        Some("operation key may not contain `/` or `?`")
    } else if key.starts_with([':', '*']) {
        Some("operation key may not start with `:` or `*`")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(Error::InvalidRoute { pattern: key.to_owned(), reason: reason.to_owned() }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, StatusCode};

    async fn echo(req: Request) -> Result<Response, Error> {
        Ok(Response::json(req.body().clone()))
    }

    fn manager() -> ProtocolManager {
        let mut manager = ProtocolManager::default();
        manager
            .register_operation(Protocol::Grpc, "users.Users.Get", echo).unwrap()
            .register_operation(Protocol::GraphQl, "GetUser", echo).unwrap();
        manager
    }

    #[tokio::test]
    async fn dispatches_by_protocol_and_key() {
        let res = manager().dispatch(Protocol::Grpc, "users.Users.Get", Bytes::from_static(b"{\"id\":1}")).await.unwrap();
        assert_eq!(res.body().as_ref(), b"{\"id\":1}");
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn keys_are_scoped_per_protocol() {
        let err = manager().dispatch(Protocol::GraphQl, "users.Users.Get", Bytes::new()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::OperationNotFound { protocol: Protocol::GraphQl, ref key } if key == "users.Users.Get"
        ));
        assert!(matches!(
            manager().dispatch(Protocol::Http, "GetUser", Bytes::new()).await,
            Err(Error::OperationNotFound { .. }),
        ));
    }

    #[tokio::test]
    async fn near_miss_keys_are_not_found() {
        let m = manager();
        for key in ["GetUser?x=1", "GetUser/", "/GetUser", "GetUser/x", ""] {
            let err = m.dispatch(Protocol::GraphQl, key, Bytes::new()).await.unwrap_err();
            assert!(
                matches!(err, Error::OperationNotFound { protocol: Protocol::GraphQl, key: ref k } if k == key),
                "{key:?}: {err}",
            );
        }
    }

    #[test]
    fn rejects_bad_keys_and_duplicates() {
        let mut m = manager();
        for bad in ["", "a/b", ":x", "*", "q?x"] {
            assert!(matches!(m.register_operation(Protocol::Grpc, bad, echo), Err(Error::InvalidRoute { .. })));
        }
        assert!(matches!(m.register_operation(Protocol::Http, "x", echo), Err(Error::InvalidRoute { .. })));
        assert!(matches!(
            m.register_operation(Protocol::Grpc, "users.Users.Get", echo),
            Err(Error::RouteConflict { .. }),
        ));
    }

    #[test]
    fn lists_operations() {
        assert_eq!(manager().operations(Protocol::GraphQl), ["GetUser"]);
    }

    #[tokio::test]
    async fn metadata_becomes_headers() {
        let mut m = ProtocolManager::default();
        m.register_operation(Protocol::Grpc, "s.S.M", |req: Request| async move {
            Ok::<_, Error>(req.header("x-tenant").unwrap_or("none").to_owned())
        }).unwrap();
        let op = Operation::new(Protocol::Grpc, "s.S.M", Bytes::new()).with_metadata("x-tenant", "acme");
        let ctx = m.execute(op).await;
        assert_eq!(ctx.response().body().as_ref(), b"acme");
        assert_eq!(ctx.request().operation(), Some("s.S.M"));
    }
}
