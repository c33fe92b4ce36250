//! strata demo: JSON endpoints, GraphQL and gRPC bridged onto one pipeline.
//!
//! Run with:
//!   RUST_LOG=info,strata=debug cargo run --example basic
//!   STRATA_TRANSPORT=http1 cargo run --example basic   # HTTP/1.1 only
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'authorization: Bearer demo-token' \
//!        -d '{"name":"alice","age":30}'
//!   curl -X POST http://localhost:3000/graphql \
//!        -d '{"query":"query GetUser($id: ID!) { user(id: $id) { name } }","variables":{"id":"7"}}'
//!   curl http://localhost:3000/healthz

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use strata::auth::{Identity, StaticTokens, TokenVerifier};
use strata::flow::export::LogExporter;
use strata::middleware::auth::Auth;
use strata::middleware::rate_limit::RateLimit;
use strata::middleware::trace::Trace;
use strata::middleware::validate::{Kind, Validate};
use strata::protocol::graphql::{GraphQl, GraphQlRequest};
use strata::protocol::grpc::{Grpc, GrpcCall, decode_frame, encode_frame};
use strata::{
    App, ContentType, Error, Method, Pipeline, Protocol, ProtocolManager, Request, Response, Router, Server,
    StatusCode, Transport, health,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Injected once here; nothing else constructs a verifier.
    let verifier: Arc<dyn TokenVerifier> = Arc::new(
        StaticTokens::new().with("demo-token", Identity::new("alice").with_role("admin")),
    );

    let pipeline = Arc::new(
        Pipeline::new()
            .with(Trace)
            .with(RateLimit::new(120, Duration::from_secs(60)))
            .with(Auth::optional(Arc::clone(&verifier)))
            .exporter(LogExporter),
    );

    let mut operations = ProtocolManager::new(Arc::clone(&pipeline));
    operations
        .register_operation(Protocol::GraphQl, "GetUser", graphql_get_user)?
        .register_operation(Protocol::Grpc, "users.Users.Get", grpc_get_user)?;
    let operations = Arc::new(operations);

    let mut router = Router::new()
        .get("/users/:id", get_user)
        .delete("/users/:id", delete_user)
        .get("/healthz", health::liveness)
        .get("/readyz", health::readiness);
    router
        .route(Method::Post, "/users")
        .layer(Auth::required(verifier))
        .layer(Validate::json().require("name", Kind::String).optional("age", Kind::Number))
        .to(create_user)?;
    router.register(Method::Post, "/graphql", graphql_bridge(Arc::clone(&operations)))?;
    router.register(Method::Post, "/grpc/*call", grpc_bridge(operations))?;

    let transport = match std::env::var("STRATA_TRANSPORT").as_deref() {
        Ok("http1") => Transport::Http1,
        _ => Transport::Hyper,
    };

    Server::bind("0.0.0.0:3000")
        .transport(transport)
        .serve(App::with_pipeline(router, pipeline))
        .await
}

// GET /users/:id
async fn get_user(req: Request) -> Result<Response, Error> {
    let id = req.param("id").unwrap_or_default();
    Ok(Response::json_value(&json!({ "id": id, "name": "alice" })))
}

// POST /users: requires a bearer token and a body with a string `name`.
async fn create_user(req: Request) -> Result<Response, Error> {
    let body: Value = req.json()?;
    let owner = req.user().map(|u| u.subject.clone());
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json_value(&json!({ "id": "99", "name": body["name"], "owner": owner })))
}

// DELETE /users/:id → 204 No Content
async fn delete_user(_req: Request) -> Result<StatusCode, Error> {
    Ok(StatusCode::NO_CONTENT)
}

// GraphQL `GetUser`: the body is the variables object.
async fn graphql_get_user(req: Request) -> Result<Value, Error> {
    let vars: Value = req.json()?;
    let Some(id) = vars["id"].as_str() else {
        return Err(Error::invalid("id", "is required"));
    };
    Ok(json!({ "user": { "id": id, "name": "alice" } }))
}

// gRPC `users.Users.Get`: the body is the raw request message.
async fn grpc_get_user(req: Request) -> Result<Response, Error> {
    Ok(Response::json(req.body().clone()))
}

fn graphql_bridge(operations: Arc<ProtocolManager>) -> impl strata::Handler {
    move |req: Request| {
        let operations = Arc::clone(&operations);
        async move {
            let call = GraphQlRequest::from_slice(req.body())?.with_headers(req.headers().to_vec());
            Ok::<_, Error>(operations.invoke(&GraphQl, call).await)
        }
    }
}

// Unary gRPC over plain HTTP: status and message travel as headers, since
// responses here carry no trailers.
fn grpc_bridge(operations: Arc<ProtocolManager>) -> impl strata::Handler {
    move |req: Request| {
        let operations = Arc::clone(&operations);
        async move {
            let path = format!("/{}", req.param("call").unwrap_or_default());
            let mut call = GrpcCall::new(path, decode_frame(req.body())?);
            call.metadata = req.headers().to_vec();

            let reply = operations.invoke(&Grpc, call).await;
            let body = if reply.is_ok() { encode_frame(&reply.payload)? } else { Bytes::new() };
            let mut res = Response::builder();
            for (name, value) in reply.metadata.iter().chain(&reply.trailers()) {
                res = res.header(name, value);
            }
            Ok::<_, Error>(res.bytes(ContentType::Grpc, body))
        }
    }
}
