//! Bearer-token authentication.
//!
//! Reads `Authorization: Bearer <token>`, asks the injected
//! [`TokenVerifier`], and on success attaches the [`Identity`] to the context.
//! A missing or rejected token leaves the slot empty; that only fails the
//! request when the middleware was built with [`Auth::required`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::{Identity, TokenVerifier};
use crate::context::Context;
use crate::error::Error;

use super::{Middleware, Next};

pub struct Auth {
    verifier: Arc<dyn TokenVerifier>,
    required: bool,
}

impl Auth {
    /// Attaches an identity when one can be verified; never rejects.
    pub fn optional(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier, required: false }
    }

    /// Fails with [`Error::Unauthorized`] unless an identity is attached.
    pub fn required(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier, required: true }
    }

    async fn identify(&self, ctx: &Context) -> Option<Identity> {
        let token = bearer_token(ctx.header("authorization")?)?;
        self.verifier.verify(token).await
    }
}

/// Extracts the token from a `Bearer` credential. The scheme is case-insensitive.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[async_trait]
impl Middleware for Auth {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), Error> {
        if ctx.user().is_none() {
            if let Some(identity) = self.identify(ctx).await {
                tracing::debug!(subject = %identity.subject, "authenticated");
                ctx.set_user(identity);
            }
        }

        if self.required && ctx.user().is_none() {
            return Err(Error::Unauthorized);
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokens;
    use crate::middleware::{Chain, layer};
    use crate::{Method, Request, Response};

    fn verifier() -> Arc<dyn TokenVerifier> {
        Arc::new(StaticTokens::new().with("s3cret", Identity::new("alice").with_role("admin")))
    }

    async fn whoami(req: Request) -> Result<Response, Error> {
        Ok(Response::text(req.user().map_or("anonymous", |u| u.subject.as_str()).to_owned()))
    }

    fn ctx(authorization: Option<&str>) -> Context {
        let headers = authorization
            .map(|v| vec![("Authorization".to_owned(), v.to_owned())])
            .unwrap_or_default();
        Context::new(Method::Get, "/me").with_headers(headers)
    }

    #[test]
    fn parses_bearer_scheme() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer   abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer"), None);
    }

    #[tokio::test]
    async fn optional_attaches_identity_when_valid() {
        let chain = Chain::compose(vec![layer(Auth::optional(verifier()))], whoami);

        let mut ok = ctx(Some("Bearer s3cret"));
        chain.execute(&mut ok).await.unwrap();
        assert_eq!(ok.response().body().as_ref(), b"alice");
        assert!(ok.user().is_some_and(|u| u.has_role("admin")));

        let mut bad = ctx(Some("Bearer nope"));
        chain.execute(&mut bad).await.unwrap();
        assert_eq!(bad.response().body().as_ref(), b"anonymous");
        assert!(bad.user().is_none());
    }

    #[tokio::test]
    async fn required_rejects_anonymous_callers() {
        let chain = Chain::compose(vec![layer(Auth::required(verifier()))], whoami);

        let mut missing = ctx(None);
        assert!(matches!(chain.execute(&mut missing).await, Err(Error::Unauthorized)));

        let mut ok = ctx(Some("Bearer s3cret"));
        assert!(chain.execute(&mut ok).await.is_ok());
    }
}
