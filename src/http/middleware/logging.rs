//! Request logging middleware.

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;

use crate::http::handler::{middleware_fn, Middleware};
use crate::http::services::Logger;

/// Install `logger` on every request passing through.
pub fn add_logger(logger: Arc<dyn Logger>) -> Middleware {
    middleware_fn(move |ctx, next| {
        ctx.logger = Some(Arc::clone(&logger));
        Box::pin(next.run(ctx))
    })
}

/// Log one line per request once the inner chain has returned.
///
/// The status is what the response buffer holds at that point, so outer
/// middleware may still change it.
pub fn request_logger() -> Middleware {
    middleware_fn(|ctx, next| {
        Box::pin(async move {
            let start = Instant::now();
            let result = next.run(ctx).await;
            let elapsed = start.elapsed();
            let status = ctx.response.status().unwrap_or(StatusCode::OK);
            let ip = ctx
                .ip()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "-".to_string());

            tracing::info!(
                ip = %ip,
                method = %ctx.method(),
                path = %ctx.path(),
                status = status.as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                failed = result.is_err(),
                "Request served"
            );
            ctx.logger().info(format_args!(
                "[{}] {} {} {} {:?}",
                ip,
                ctx.method(),
                ctx.path(),
                status.as_u16(),
                elapsed
            ));

            result
        })
    })
}
