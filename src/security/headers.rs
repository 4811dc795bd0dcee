//! Host allow-listing and security response headers.
//!
//! # Responsibilities
//! - Reject requests whose Host is not on the allow-list
//! - Add `X-Frame-Options` to responses
//!
//! # Design Decisions
//! - Host comparison ignores the port and ASCII case
//! - `*` in the allow-list disables the check entirely
//! - Headers are set before the handler runs, so handlers can override them

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::{header, StatusCode};

use crate::http::context::RequestContext;
use crate::http::handler::{middleware_fn, BoxHandler, Middleware};

/// Values for the `X-Frame-Options` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XFrameOption {
    Deny,
    SameOrigin,
}

impl XFrameOption {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deny => "DENY",
            Self::SameOrigin => "SAMEORIGIN",
        }
    }
}

/// Set `X-Frame-Options` on every response.
pub fn x_frame_options(option: XFrameOption) -> Middleware {
    middleware_fn(move |ctx, next| {
        ctx.response.set_header("x-frame-options", option.as_str());
        Box::pin(next.run(ctx))
    })
}

/// Only let requests through whose host is in `hosts`.
///
/// An empty list rejects every request.
pub fn allowed_hosts<I, S>(hosts: I) -> Middleware
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let hosts: HashSet<String> = hosts
        .into_iter()
        .map(|h| h.as_ref().trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect();

    if hosts.contains("*") {
        return Arc::new(|next: BoxHandler| next);
    }

    let hosts = Arc::new(hosts);
    middleware_fn(move |ctx, next| {
        let hosts = Arc::clone(&hosts);
        Box::pin(async move {
            let host = request_host(ctx).unwrap_or_default();
            if hosts.contains(&host) {
                return next.run(ctx).await;
            }

            tracing::warn!(host = %host, "Host not allowed");
            ctx.logger().error(format_args!("Host not allowed: {host}"));
            ctx.error(StatusCode::FORBIDDEN, &format!("Host not allowed: {host}"));
            Ok(())
        })
    })
}

/// Host of the request without port, lower-cased.
fn request_host(ctx: &RequestContext) -> Option<String> {
    let raw = ctx
        .header(header::HOST)
        .map(str::to_string)
        .or_else(|| ctx.uri().authority().map(|a| a.as_str().to_string()))?;

    let host = match raw.rsplit_once(':') {
        // Bracketed IPv6 literals keep their colons.
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) && !host.ends_with(':') => {
            host.to_string()
        }
        _ => raw,
    };
    Some(host.to_ascii_lowercase())
}
