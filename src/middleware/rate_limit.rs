//! Rate limiting middleware.
//!
//! Per-client limits using a fixed window. The client is the first
//! `X-Forwarded-For` hop when present, otherwise the peer address.
//!
//! The counter table is shared by every request, so it lives behind a lock
//! owned by the middleware. Nothing else in the chain is shared.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::json;

use crate::context::Context;
use crate::error::Error;
use crate::response::Response;

use super::{Middleware, Next};

#[derive(Debug)]
struct Window {
    count: u64,
    started: Instant,
}

/// Result of one admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_after: Duration,
}

pub struct RateLimit {
    windows: Mutex<HashMap<String, Window>>,
    limit: u64,
    window: Duration,
}

impl RateLimit {
    /// At most `limit` requests per client in each `window`.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { windows: Mutex::new(HashMap::new()), limit, window }
    }

    /// Counts one request from `client` at `now`.
    pub fn check(&self, client: &str, now: Instant) -> Decision {
        let mut windows = self.windows.lock();

        // Sweep expired windows once the table gets large.
        if windows.len() > 4096 {
            let window = self.window;
            windows.retain(|_, w| now.saturating_duration_since(w.started) < window);
        }

        let entry = windows.entry(client.to_owned()).or_insert(Window { count: 0, started: now });
        let elapsed = now.saturating_duration_since(entry.started);
        if elapsed >= self.window {
            entry.count = 0;
            entry.started = now;
        }

        let reset_after = self.window.saturating_sub(now.saturating_duration_since(entry.started));
        if entry.count >= self.limit {
            return Decision { allowed: false, remaining: 0, reset_after };
        }
        entry.count += 1;
        Decision { allowed: true, remaining: self.limit - entry.count, reset_after }
    }
}

fn client_key(ctx: &Context) -> String {
    if let Some(forwarded) = ctx.header("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_owned();
        }
    }
    ctx.peer().map_or_else(|| "unknown".to_owned(), |addr| addr.ip().to_string())
}

#[async_trait]
impl Middleware for RateLimit {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        let client = client_key(ctx);
        let decision = self.check(&client, Instant::now());
        let retry_after = decision.reset_after.as_secs().max(1).to_string();

        if !decision.allowed {
            tracing::debug!(%client, "rate limit exceeded");
            ctx.set_response(
                Response::builder()
                    .status(StatusCode::TOO_MANY_REQUESTS)
                    .header("retry-after", &retry_after)
                    .json_value(&json!({ "error": "rate_limited" })),
            );
            return Ok(());
        }

        let result = next.run(ctx).await;
        if result.is_ok() {
            ctx.response_mut().set_header("x-ratelimit-limit", self.limit.to_string());
            ctx.response_mut().set_header("x-ratelimit-remaining", decision.remaining.to_string());
        }
        result
    }
}
