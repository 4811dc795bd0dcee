//! Request admission checks.
//!
//! # Responsibilities
//! - Enforce the accepted request body media types
//!
//! # Design Decisions
//! - Requests without a body are always admitted
//! - Media type comparison ignores parameters (`; charset=...`) and case
//! - Rejection answers 415 Unsupported Media Type

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::{header, StatusCode};

use crate::http::handler::{middleware_fn, Middleware};

/// Only admit request bodies whose `Content-Type` is one of `types`.
pub fn allow_content_type<I, S>(types: I) -> Middleware
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let allowed: Arc<HashSet<String>> = Arc::new(
        types
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .collect(),
    );

    middleware_fn(move |ctx, next| {
        let allowed = Arc::clone(&allowed);
        Box::pin(async move {
            if ctx.body().is_empty() {
                return next.run(ctx).await;
            }

            let media_type = ctx
                .header(header::CONTENT_TYPE)
                .and_then(|v| v.split(';').next())
                .map(|v| v.trim().to_ascii_lowercase())
                .unwrap_or_default();

            if allowed.contains(&media_type) {
                next.run(ctx).await
            } else {
                tracing::debug!(content_type = %media_type, "Unsupported media type");
                ctx.error(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported Media Type");
                Ok(())
            }
        })
    })
}
