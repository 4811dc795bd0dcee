//! Gzip response compression.
//!
//! The body is compressed once, after the rest of the chain has finished
//! writing into the buffer, so inner middleware can still rewrite it.

use std::io::Write;

use axum::http::header;
use axum::http::HeaderValue;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::http::error::HandlerError;
use crate::http::handler::{middleware_fn, Middleware};

/// Gzip response bodies for clients that accept it.
pub fn gzip() -> Middleware {
    gzip_with(Compression::default())
}

pub fn gzip_with(level: Compression) -> Middleware {
    middleware_fn(move |ctx, next| {
        Box::pin(async move {
            let accepted = accepts_gzip(ctx.header(header::ACCEPT_ENCODING));
            next.run(ctx).await?;

            ctx.append_header_token(header::VARY, "Accept-Encoding");
            let response = &mut ctx.response;
            if !accepted || response.is_empty() || response.header(header::CONTENT_ENCODING).is_some() {
                return Ok(());
            }

            let mut encoder = GzEncoder::new(Vec::with_capacity(response.len() / 2), level);
            encoder.write_all(response.body())?;
            let compressed = encoder.finish()?;

            tracing::trace!(from = response.len(), to = compressed.len(), "Compressed response body");
            response.replace_body(&compressed);
            response.headers_mut().remove(header::CONTENT_LENGTH);
            response.insert_header(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            Ok::<_, HandlerError>(())
        })
    })
}

/// Whether `Accept-Encoding` lists gzip, or `*`, with a non-zero quality.
fn accepts_gzip(accept_encoding: Option<&str>) -> bool {
    let Some(value) = accept_encoding else {
        return false;
    };
    value.split(',').any(|item| {
        let mut params = item.split(';');
        let coding = params.next().unwrap_or_default().trim();
        let quality = params
            .find_map(|p| p.trim().strip_prefix("q="))
            .map_or(1.0, |q| q.trim().parse::<f32>().unwrap_or(0.0));
        (coding.eq_ignore_ascii_case("gzip") || coding == "*") && quality > 0.0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::{handler_fn, wrap, BoxHandler};
    use crate::http::testing::{buffer, collect, request};
    use crate::http::RequestContext;
    use axum::http::StatusCode;
    use flate2::read::GzDecoder;
    use std::io::Read;

    const PAGE: &str = "switchyard switchyard switchyard switchyard switchyard";

    fn page() -> BoxHandler {
        handler_fn(|ctx| {
            Box::pin(async move {
                ctx.text(StatusCode::OK, PAGE);
                Ok(())
            })
        })
    }

    async fn fetch(accept_encoding: Option<&'static str>) -> (axum::http::HeaderMap, Vec<u8>) {
        let mut req = request("GET", "/");
        if let Some(value) = accept_encoding {
            req.headers_mut()
                .insert(header::ACCEPT_ENCODING, HeaderValue::from_static(value));
        }
        let (buffer, rx) = buffer();
        let mut ctx = RequestContext::new(req, buffer);

        wrap(page(), &[gzip()]).call(&mut ctx).await.unwrap();
        ctx.response.finalize().unwrap();

        let response = rx.await.unwrap();
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        (parts.headers, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_compresses_when_accepted() {
        let (headers, body) = fetch(Some("deflate, gzip;q=0.8")).await;
        assert_eq!(headers["content-encoding"], "gzip");
        assert_eq!(headers["vary"], "Accept-Encoding");

        let mut text = String::new();
        GzDecoder::new(body.as_slice()).read_to_string(&mut text).unwrap();
        assert_eq!(text, PAGE);
    }

    #[tokio::test]
    async fn test_identity_without_gzip_in_accept_encoding() {
        for accept in [None, Some("br"), Some("gzip;q=0")] {
            let (headers, body) = fetch(accept).await;
            assert!(headers.get("content-encoding").is_none(), "{accept:?}");
            assert_eq!(headers["vary"], "Accept-Encoding");
            assert_eq!(body, PAGE.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_empty_body_is_left_alone() {
        let chain = wrap(
            handler_fn(|ctx| {
                Box::pin(async move {
                    ctx.response.set_status(StatusCode::NO_CONTENT);
                    Ok(())
                })
            }),
            &[gzip()],
        );
        let mut req = request("GET", "/");
        req.headers_mut()
            .insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        let (buffer, rx) = buffer();
        let mut ctx = RequestContext::new(req, buffer);
        chain.call(&mut ctx).await.unwrap();
        ctx.response.finalize().unwrap();

        let (status, headers, body) = collect(rx).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(headers.get("content-encoding").is_none());
        assert!(body.is_empty());
    }

    #[test]
    fn test_accept_encoding_parsing() {
        assert!(accepts_gzip(Some("gzip")));
        assert!(accepts_gzip(Some("GZIP; q=0.5")));
        assert!(accepts_gzip(Some("*")));
        assert!(!accepts_gzip(Some("gzip;q=0.0, br")));
        assert!(!accepts_gzip(Some("identity")));
        assert!(!accepts_gzip(None));
    }
}
