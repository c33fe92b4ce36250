//! Probe handlers for orchestrators.
//!
//! `liveness` answers as long as the runtime can schedule a task. `readiness`
//! is the unconditional variant; services with dependencies register their
//! own handler of the same shape under the readiness path.
//!
//! ```rust
//! use strata::{Router, health};
//!
//! let router = Router::new()
//!     .get("/livez", health::liveness)
//!     .get("/ready", health::readiness);
//! ```
//!
//! A gated readiness check:
//!
//! ```rust
//! use strata::{Error, Request, Response, StatusCode};
//!
//! async fn ready(_req: Request) -> Result<Response, Error> {
//!     let database_up = true;
//!     Ok(match database_up {
//!         true => Response::json_value(&serde_json::json!({ "status": "ready" })),
//!         false => Response::with_status(StatusCode::SERVICE_UNAVAILABLE),
//!     })
//! }
//! ```

use bytes::Bytes;

use crate::{Error, Request, Response};

/// Always `200 {"status":"ok"}`. No dependencies: if it can answer, it is alive.
pub async fn liveness(_req: Request) -> Result<Response, Error> {
    Ok(Response::json(Bytes::from_static(br#"{"status":"ok"}"#)))
}

/// `200 {"status":"ready"}`.
pub async fn readiness(_req: Request) -> Result<Response, Error> {
    Ok(Response::json(Bytes::from_static(br#"{"status":"ready"}"#)))
}
