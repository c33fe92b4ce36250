//! # strata
//!
//! A request-processing core: one router and one onion middleware chain
//! serving HTTP, GraphQL and gRPC alike.
//!
//! Every inbound request, whichever transport or protocol it arrived on, is
//! turned into a [`Context`] by an adapter, resolved by a [`Router`], run
//! through the middleware chain, and handed back to the adapter that built
//! it. Each stage is recorded as a span, so every request also leaves a
//! [`SpanTree`](flow::SpanTree) behind.
//!
//! ```text
//! hyper auto / http1 ─> Adapter ─┐
//!                                ├─> Context ─> Router ─> middleware ─> handler
//! GraphQL / gRPC ─> ProtocolManager ─┘                                  │
//!        ^                                                              │
//!        └──────────────────────── finished Context <───────────────────┘
//! ```
//!
//! What strata leaves to others:
//!
//! - **TLS termination**: the reverse proxy
//! - **Token signing and verification**: a [`TokenVerifier`](auth::TokenVerifier) you inject
//! - **GraphQL execution, protobuf decoding**: your handlers and their libraries
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use strata::middleware::{rate_limit::RateLimit, trace::Trace};
//! use strata::{App, Error, Pipeline, Request, Response, Router, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let router = Router::new()
//!         .get("/users/:id", get_user)
//!         .post("/users", create_user);
//!
//!     let pipeline = Pipeline::new()
//!         .with(Trace)
//!         .with(RateLimit::new(100, Duration::from_secs(60)));
//!
//!     Server::bind("0.0.0.0:3000")
//!         .serve(App::with_pipeline(router, Arc::new(pipeline)))
//!         .await
//! }
//!
//! async fn get_user(req: Request) -> Result<Response, Error> {
//!     let id = req.param("id").unwrap_or_default();
//!     Ok(Response::json_value(&serde_json::json!({ "id": id })))
//! }
//!
//! async fn create_user(req: Request) -> Result<Response, Error> {
//!     let user: serde_json::Value = req.json()?;
//!     Ok(Response::builder()
//!         .status(StatusCode::CREATED)
//!         .header("location", "/users/99")
//!         .json_value(&user))
//! }
//! ```

mod context;
mod error;
mod handler;
mod method;
mod pipeline;
mod request;
mod response;
mod router;

pub mod adapter;
pub mod auth;
pub mod flow;
pub mod health;
pub mod middleware;
pub mod protocol;
pub mod server;

pub use context::Context;
pub use error::{Error, FieldError};
pub use handler::{BoxFuture, Handler};
pub use http::StatusCode;
pub use method::{Method, UnknownMethod};
pub use pipeline::{App, Pipeline};
pub use protocol::{Operation, Protocol, ProtocolManager};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Json, Response, ResponseBuilder};
pub use router::{Resolved, Route, RouteBuilder, RouteKey, Router, WILDCARD};
pub use server::{Server, Transport};
