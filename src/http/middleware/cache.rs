//! Cache-control response headers.

use std::time::Duration;

use axum::http::header::{self, HeaderName};
use axum::http::HeaderValue;

use crate::http::handler::{middleware_fn, Middleware};

const VALIDATOR_HEADERS: [HeaderName; 6] = [
    header::ETAG,
    header::IF_MODIFIED_SINCE,
    header::IF_MATCH,
    header::IF_NONE_MATCH,
    header::IF_RANGE,
    header::IF_UNMODIFIED_SINCE,
];

/// Let clients and proxies cache responses for `max_age`.
pub fn cache(max_age: Duration) -> Middleware {
    let value = HeaderValue::try_from(format!("public, max-age={}", max_age.as_secs()))
        .unwrap_or_else(|_| HeaderValue::from_static("public"));

    middleware_fn(move |ctx, next| {
        let headers = ctx.response.headers_mut();
        for name in &VALIDATOR_HEADERS {
            headers.remove(name);
        }
        headers.insert(header::CACHE_CONTROL, value.clone());
        Box::pin(next.run(ctx))
    })
}

/// Forbid caching of responses.
pub fn no_cache() -> Middleware {
    middleware_fn(|ctx, next| {
        let headers = ctx.response.headers_mut();
        for name in &VALIDATOR_HEADERS {
            headers.remove(name);
        }
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(
                "no-cache, no-store, no-transform, must-revalidate, private, max-age=0",
            ),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
        Box::pin(next.run(ctx))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::{handler_fn, wrap};
    use crate::http::testing::{collect, context};

    fn etagged() -> crate::http::handler::BoxHandler {
        handler_fn(|ctx| {
            Box::pin(async move {
                ctx.response.write_str("body");
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_cache_sets_max_age() {
        let chain = wrap(etagged(), &[cache(Duration::from_secs(3600))]);
        let (mut ctx, rx) = context("GET", "/static/app.css");
        ctx.response.set_header("etag", "\"abc\"");
        chain.call(&mut ctx).await.unwrap();
        ctx.response.finalize().unwrap();

        let (_, headers, _) = collect(rx).await;
        assert_eq!(headers["cache-control"], "public, max-age=3600");
        assert!(headers.get("etag").is_none());
    }

    #[tokio::test]
    async fn test_no_cache_headers() {
        let chain = wrap(etagged(), &[no_cache()]);
        let (mut ctx, rx) = context("GET", "/account");
        chain.call(&mut ctx).await.unwrap();
        ctx.response.finalize().unwrap();

        let (_, headers, body) = collect(rx).await;
        assert_eq!(
            headers["cache-control"],
            "no-cache, no-store, no-transform, must-revalidate, private, max-age=0"
        );
        assert_eq!(headers["pragma"], "no-cache");
        assert_eq!(headers["expires"], "0");
        assert_eq!(body, "body");
    }
}
