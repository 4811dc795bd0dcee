//! Helpers for unit tests that drive handlers without a server.

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use bytes::Bytes;
use tokio::sync::oneshot;

use super::buffer::{ResponseBuffer, ResponseCollector};
use super::context::RequestContext;

pub(crate) fn request(method: &str, uri: &str) -> Request<Bytes> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Bytes::new())
        .unwrap()
}

pub(crate) fn buffer() -> (ResponseBuffer, oneshot::Receiver<Response<Body>>) {
    let (sink, rx) = ResponseCollector::channel();
    (ResponseBuffer::new(Box::new(sink)), rx)
}

pub(crate) fn context(
    method: &str,
    uri: &str,
) -> (RequestContext, oneshot::Receiver<Response<Body>>) {
    let (buffer, rx) = buffer();
    (RequestContext::new(request(method, uri), buffer), rx)
}

pub(crate) async fn collect(
    rx: oneshot::Receiver<Response<Body>>,
) -> (StatusCode, HeaderMap, String) {
    let response = rx.await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    (parts.status, parts.headers, String::from_utf8(bytes.to_vec()).unwrap())
}
