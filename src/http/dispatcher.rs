//! Request dispatch: route lookup, chain assembly, single commit.
//!
//! # Responsibilities
//! - Resolve the route for a request (or the not-found handler)
//! - Wrap the handler with route and global middleware per request
//! - Run the chain once and commit the response buffer exactly once
//!
//! # Design Decisions
//! - The chain is assembled per request; the route table stays immutable
//! - Global middleware wraps outermost: `G1(G2(R1(R2(handler))))`
//! - A failure escaping the chain leaves the buffer uncommitted and is
//!   returned to the host, which answers 500

use std::sync::Arc;
use std::time::Instant;

use axum::http::{Request, StatusCode};
use bytes::Bytes;

use super::buffer::{ResponseBuffer, ResponseSink};
use super::context::RequestContext;
use super::error::DispatchError;
use super::handler::{handler_fn, wrap, BoxHandler};
use crate::observability::metrics;
use crate::routing::{Route, Router};

const NOT_FOUND_LABEL: &str = "<not found>";

/// Answers `404 page not found` as plain text.
pub(crate) fn default_not_found() -> BoxHandler {
    handler_fn(|ctx| {
        Box::pin(async move {
            ctx.error(StatusCode::NOT_FOUND, "404 page not found");
            Ok(())
        })
    })
}

impl Router {
    /// Serve one request, writing the response into `sink`.
    pub async fn dispatch(
        self: &Arc<Self>,
        request: Request<Bytes>,
        sink: Box<dyn ResponseSink>,
    ) -> Result<(), DispatchError> {
        let start = Instant::now();
        let method = request.method().clone();

        let mut ctx = RequestContext::new(request, ResponseBuffer::new(sink))
            .with_router(Arc::clone(self));
        if let Some(logger) = &self.logger {
            ctx = ctx.with_logger(Arc::clone(logger));
        }
        if let Some(templates) = &self.templates {
            ctx.templates = Some(Arc::clone(templates));
        }

        if self.config.skip_trailing_slash {
            let path = ctx.path();
            if path.len() > 1 && path.ends_with('/') {
                let trimmed = path[..path.len() - 1].to_string();
                ctx.set_path(trimmed);
            }
        }

        let (handler, label) = match self.match_route(&method, ctx.path()) {
            Some(found) => {
                let handler = self.chain(found.route);
                let label = found.route.pattern().as_str();
                ctx.set_params(found.params);
                (handler, label)
            }
            None => (Arc::clone(&self.not_found), NOT_FOUND_LABEL),
        };

        tracing::debug!(method = %method, path = %ctx.path(), route = label, "Dispatching request");

        match handler.call(&mut ctx).await {
            Ok(()) => {
                let status = ctx.response.status().unwrap_or(StatusCode::OK);
                metrics::record_request(method.as_str(), status.as_u16(), label, start);
                ctx.response.finalize()?;
                Ok(())
            }
            Err(err) => {
                metrics::record_request(
                    method.as_str(),
                    StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                    label,
                    start,
                );
                Err(err.into())
            }
        }
    }

    /// Route handler wrapped by route middleware, then global middleware.
    fn chain(&self, route: &Route) -> BoxHandler {
        let handler = match &route.handler {
            Some(handler) => Arc::clone(handler),
            None => return Arc::clone(&self.not_found),
        };
        let handler = wrap(handler, &route.middleware);
        if route.middleware_enabled && !self.global.is_empty() {
            wrap(handler, &self.global)
        } else {
            handler
        }
    }
}
