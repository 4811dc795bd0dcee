//! Failure recovery for the handler chain.
//!
//! Catches both `Err` results and panics raised further down the chain,
//! discards whatever was written to the response so far and lets an error
//! callback render a replacement.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::http::context::RequestContext;
use crate::http::error::HandlerError;
use crate::http::handler::{middleware_fn, Middleware};

/// Callback rendering an error response after the buffer was cleared.
pub type ErrorHandler = Arc<dyn Fn(&HandlerError, &mut RequestContext) + Send + Sync>;

/// Recover with the default plain-text error page.
pub fn default_recoverer() -> Middleware {
    recoverer(Arc::new(render_error))
}

/// Recover from failures below this middleware using `on_error`.
pub fn recoverer(on_error: ErrorHandler) -> Middleware {
    middleware_fn(move |ctx, next| {
        let on_error = Arc::clone(&on_error);
        Box::pin(async move {
            let err = match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => err,
                Err(payload) => HandlerError::Panic(panic_message(payload.as_ref())),
            };

            tracing::error!(
                method = %ctx.method(),
                path = %ctx.path(),
                error = %err,
                "Recovered from handler failure"
            );
            ctx.logger().error(format_args!(
                "{} {}: {}",
                ctx.method(),
                ctx.path(),
                err
            ));

            ctx.response.clear();
            on_error(&err, ctx);
            Ok(())
        })
    })
}

/// Plain-text page using the error's status.
///
/// Internal details are only shown for explicit status errors.
pub fn render_error(err: &HandlerError, ctx: &mut RequestContext) {
    let status = err.status_code();
    match err {
        HandlerError::Status { message, .. } => ctx.error(status, message),
        _ => ctx.error(status, status.canonical_reason().unwrap_or("Error")),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::{handler_fn, wrap};
    use crate::http::testing::{collect, context};
    use axum::http::StatusCode;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_panic_becomes_500_and_discards_partial_output() {
        let handler = handler_fn(|ctx| {
            Box::pin(async move {
                ctx.response.set_header("x-partial", "1");
                ctx.response.write_str("half a page");
                if ctx.path() == "/boom" {
                    panic!("database on fire");
                }
                Ok(())
            })
        });
        let chain = wrap(handler, &[default_recoverer()]);

        let (mut ctx, rx) = context("GET", "/boom");
        chain.call(&mut ctx).await.unwrap();
        ctx.response.finalize().unwrap();

        let (status, headers, body) = collect(rx).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Internal Server Error\n");
        assert!(headers.get("x-partial").is_none());
    }

    #[tokio::test]
    async fn test_status_error_renders_its_message() {
        let handler = handler_fn(|_ctx| {
            Box::pin(async move { Err(HandlerError::status(StatusCode::BAD_REQUEST, "missing field: title")) })
        });
        let chain = wrap(handler, &[default_recoverer()]);

        let (mut ctx, rx) = context("POST", "/posts");
        chain.call(&mut ctx).await.unwrap();
        ctx.response.finalize().unwrap();

        let (status, _, body) = collect(rx).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "missing field: title\n");
    }

    #[tokio::test]
    async fn test_custom_callback_sees_panic_message() {
        let seen = Arc::new(Mutex::new(None));
        let record = Arc::clone(&seen);
        let on_error: ErrorHandler = Arc::new(move |err: &HandlerError, ctx: &mut RequestContext| {
            *record.lock().unwrap() = Some(err.to_string());
            ctx.text(StatusCode::SERVICE_UNAVAILABLE, "try later");
        });

        let handler = handler_fn(|ctx| {
            Box::pin(async move {
                let code = ctx.uri().path().len() + 6;
                if code > 0 {
                    panic!("exit code {code}");
                }
                Ok(())
            })
        });
        let chain = wrap(handler, &[recoverer(on_error)]);

        let (mut ctx, rx) = context("GET", "/");
        chain.call(&mut ctx).await.unwrap();
        ctx.response.finalize().unwrap();

        let (status, _, body) = collect(rx).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "try later");
        assert_eq!(
            seen.lock().unwrap().as_deref(),
            Some("handler panicked: exit code 7")
        );
    }
}
