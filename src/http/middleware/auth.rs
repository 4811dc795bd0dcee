//! Authentication gates.
//!
//! Decisions are taken from `RequestContext::user`, which an earlier
//! middleware is expected to install.

use std::sync::Arc;

use axum::http::StatusCode;

use crate::http::context::RequestContext;
use crate::http::handler::{middleware_fn, HandlerResult, Middleware};

/// Callback answering a request that did not pass a gate.
pub type Rejection = Arc<dyn Fn(&mut RequestContext) -> HandlerResult + Send + Sync>;

/// Only let authenticated users through; everyone else goes to `reject`.
pub fn login_required_with(reject: Rejection) -> Middleware {
    gate(true, reject)
}

/// Only let anonymous users through; authenticated users go to `reject`.
pub fn logout_required_with(reject: Rejection) -> Middleware {
    gate(false, reject)
}

/// Redirect anonymous users to `redirect_url`, remembering where they were
/// headed in the `next` query parameter.
pub fn login_required(redirect_url: impl Into<String>) -> Middleware {
    login_required_with(redirect_to(redirect_url.into()))
}

/// Redirect authenticated users away to `redirect_url`.
pub fn logout_required(redirect_url: impl Into<String>) -> Middleware {
    logout_required_with(redirect_to(redirect_url.into()))
}

fn redirect_to(url: String) -> Rejection {
    Arc::new(move |ctx: &mut RequestContext| ctx.redirect_with_next(&url, StatusCode::FOUND))
}

fn gate(want_authenticated: bool, reject: Rejection) -> Middleware {
    middleware_fn(move |ctx, next| {
        let reject = Arc::clone(&reject);
        Box::pin(async move {
            if ctx.is_authenticated() == want_authenticated {
                return next.run(ctx).await;
            }
            tracing::debug!(
                path = %ctx.path(),
                authenticated = !want_authenticated,
                "Authentication gate rejected request"
            );
            reject(ctx)
        })
    })
}
