//! Per-request state passed through the middleware chain.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::header::{self, HeaderName};
use axum::http::{Extensions, HeaderMap, HeaderValue, Method, Request, StatusCode, Uri, Version};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use url::form_urlencoded;

use super::buffer::ResponseBuffer;
use super::cookie::{find_cookie, SetCookie};
use super::error::HandlerError;
use super::handler::HandlerResult;
use super::services::{Logger, NopLogger, Session, TemplateResolver, User};
use crate::routing::{RouteError, Router, UrlParams};

static NOP_LOGGER: NopLogger = NopLogger;

/// Everything a handler can see about one request, plus the response being
/// built for it.
pub struct RequestContext {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    extensions: Extensions,
    body: Bytes,
    path: String,
    params: UrlParams,
    remote_addr: Option<SocketAddr>,
    data: HashMap<String, Value>,
    router: Option<Arc<Router>>,

    /// Staged response. Nothing reaches the client until the dispatcher
    /// finalizes it.
    pub response: ResponseBuffer,
    pub session: Option<Box<dyn Session>>,
    pub user: Option<Arc<dyn User>>,
    pub logger: Option<Arc<dyn Logger>>,
    pub templates: Option<Arc<dyn TemplateResolver>>,
}

impl RequestContext {
    /// Build a context from a fully read request.
    ///
    /// The remote address is taken from axum's `ConnectInfo` extension when
    /// the server installed it.
    pub fn new(request: Request<Bytes>, response: ResponseBuffer) -> Self {
        let (parts, body) = request.into_parts();
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            path: parts.uri.path().to_string(),
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            extensions: parts.extensions,
            body,
            params: Default::default(),
            remote_addr,
            data: HashMap::new(),
            router: None,
            response,
            session: None,
            user: None,
            logger: None,
            templates: None,
        }
    }

    pub fn with_router(mut self, router: Arc<Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub(crate) fn set_path(&mut self, path: String) {
        self.path = path;
    }

    pub(crate) fn set_params(&mut self, params: UrlParams) {
        self.params = params;
    }

    // ---- request ----

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Path used for routing. Differs from `uri().path()` only when the
    /// router strips trailing slashes.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// First value of a query string parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Form fields: an `application/x-www-form-urlencoded` body first, then
    /// the query string. Repeated keys keep every value in order.
    pub fn form(&self) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = Vec::new();
        if self.has_form_body() {
            fields.extend(form_urlencoded::parse(&self.body).into_owned());
        }
        if let Some(query) = self.uri.query() {
            fields.extend(form_urlencoded::parse(query.as_bytes()).into_owned());
        }
        fields
    }

    /// First form value for `name`, see [`form`](Self::form).
    pub fn form_value(&self, name: &str) -> Option<String> {
        self.form()
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    fn has_form_body(&self) -> bool {
        let takes_body = matches!(self.method, Method::POST | Method::PUT | Method::PATCH);
        let media_type = self
            .header(header::CONTENT_TYPE)
            .and_then(|v| v.split(';').next())
            .map(str::trim);
        takes_body
            && media_type.is_some_and(|m| m.eq_ignore_ascii_case("application/x-www-form-urlencoded"))
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value as a string, if present and valid ASCII.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn params(&self) -> &UrlParams {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Peer IP of the connection.
    pub fn ip(&self) -> Option<IpAddr> {
        self.remote_addr.map(|addr| addr.ip())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|h| find_cookie(h, name))
    }

    // ---- data bag ----

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    // ---- collaborators ----

    /// Request logger, or a no-op logger when none was installed.
    pub fn logger(&self) -> &dyn Logger {
        match &self.logger {
            Some(logger) => logger.as_ref(),
            None => &NOP_LOGGER,
        }
    }

    pub fn router(&self) -> Option<&Arc<Router>> {
        self.router.as_ref()
    }

    /// Reverse a named route with positional arguments.
    pub fn url(&self, name: &str, args: &[&dyn fmt::Display]) -> Result<String, RouteError> {
        match &self.router {
            Some(router) => router.reverse(name, args),
            None => Err(RouteError::UnknownRoute { name: name.to_string() }),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_authenticated())
    }

    // ---- response helpers ----

    /// Discard the pending response and answer with a plain-text error.
    pub fn error(&mut self, status: StatusCode, message: &str) {
        self.response.clear();
        self.response.set_header("content-type", "text/plain; charset=utf-8");
        self.response.set_header("x-content-type-options", "nosniff");
        self.response.set_status(status);
        self.response.write_str(message);
        self.response.write_str("\n");
    }

    pub fn text(&mut self, status: StatusCode, body: &str) {
        self.response.set_header("content-type", "text/plain; charset=utf-8");
        self.response.set_status(status);
        self.response.write_str(body);
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, status: StatusCode, value: &T) -> HandlerResult {
        let body = serde_json::to_vec(value).map_err(HandlerError::other)?;
        self.response.set_header("content-type", "application/json");
        self.response.set_status(status);
        self.response.write(&body);
        Ok(())
    }

    /// Render the named template with `data` as an HTML response.
    pub fn render<T: Serialize + ?Sized>(&mut self, status: StatusCode, name: &str, data: &T) -> HandlerResult {
        let templates = self.templates.clone().ok_or_else(|| {
            HandlerError::status(StatusCode::INTERNAL_SERVER_ERROR, "no template resolver installed")
        })?;
        let data = serde_json::to_value(data).map_err(HandlerError::other)?;
        self.response.set_header("content-type", "text/html; charset=utf-8");
        self.response.set_status(status);
        templates.render(name, &data, &mut self.response)
    }

    pub fn redirect(&mut self, location: &str, status: StatusCode) -> HandlerResult {
        let value = HeaderValue::from_str(location).map_err(HandlerError::other)?;
        self.response.headers_mut().insert(header::LOCATION, value);
        self.response.set_status(status);
        Ok(())
    }

    /// Redirect to `target`, carrying the current URL in a `next` parameter.
    pub fn redirect_with_next(&mut self, target: &str, status: StatusCode) -> HandlerResult {
        let current = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("next", current)
            .finish();
        let separator = if target.contains('?') { '&' } else { '?' };
        let location = format!("{target}{separator}{query}");
        self.redirect(&location, status)
    }

    pub fn set_cookie(&mut self, cookie: &SetCookie) -> HandlerResult {
        let value = HeaderValue::try_from(cookie.to_string()).map_err(HandlerError::other)?;
        self.response.headers_mut().append(header::SET_COOKIE, value);
        Ok(())
    }

    pub fn delete_cookie(&mut self, name: &str) -> HandlerResult {
        self.set_cookie(&SetCookie::expired(name))
    }

    /// Append a token to a comma-separated response header such as `Vary`.
    pub fn append_header_token(&mut self, name: HeaderName, token: &'static str) {
        let headers = self.response.headers_mut();
        let present = headers
            .get_all(&name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token));
        if !present {
            headers.append(name, HeaderValue::from_static(token));
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("remote_addr", &self.remote_addr)
            .field("response", &self.response)
            .field("has_session", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{collect, context, request};

    #[tokio::test]
    async fn test_error_replaces_pending_output() {
        let (mut ctx, rx) = context("GET", "/");
        ctx.response.set_header("x-stale", "1");
        ctx.response.write_str("partial");
        ctx.error(StatusCode::FORBIDDEN, "Forbidden");
        ctx.response.finalize().unwrap();

        let (status, headers, body) = collect(rx).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Forbidden\n");
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert!(headers.get("x-stale").is_none());
    }

    #[tokio::test]
    async fn test_redirect_with_next_encodes_current_url() {
        let (mut ctx, rx) = context("GET", "/account/settings?tab=email");
        ctx.redirect_with_next("/login", StatusCode::FOUND).unwrap();
        ctx.response.finalize().unwrap();

        let (status, headers, _) = collect(rx).await;
        assert_eq!(status, StatusCode::FOUND);
        assert_eq!(
            headers["location"],
            "/login?next=%2Faccount%2Fsettings%3Ftab%3Demail"
        );
    }

    #[test]
    fn test_request_accessors() {
        let mut req = request("POST", "/search?q=rust+web&page=2");
        req.headers_mut()
            .insert(header::COOKIE, HeaderValue::from_static("a=1; sid=xyz"));
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4000))));
        let (sink, _rx) = crate::http::buffer::ResponseCollector::channel();
        let ctx = RequestContext::new(req, ResponseBuffer::new(Box::new(sink)));

        assert_eq!(ctx.query_param("q").as_deref(), Some("rust web"));
        assert_eq!(ctx.cookie("sid"), Some("xyz"));
        assert_eq!(ctx.ip(), Some(IpAddr::from([10, 0, 0, 7])));
        assert_eq!(ctx.path(), "/search");
        assert!(!ctx.is_authenticated());
    }

    fn form_request(method: &str, content_type: &'static str, body: &'static str) -> RequestContext {
        let req = Request::builder()
            .method(method)
            .uri("/signup?plan=pro&name=query")
            .header(header::CONTENT_TYPE, content_type)
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap();
        let (sink, _rx) = crate::http::buffer::ResponseCollector::channel();
        RequestContext::new(req, ResponseBuffer::new(Box::new(sink)))
    }

    #[test]
    fn test_form_reads_body_before_query() {
        let ctx = form_request(
            "POST",
            "application/x-www-form-urlencoded; charset=utf-8",
            "name=Jane+Doe&tag=a&tag=b%26c",
        );

        assert_eq!(ctx.form_value("name").as_deref(), Some("Jane Doe"));
        assert_eq!(ctx.form_value("plan").as_deref(), Some("pro"));
        let tags: Vec<String> = ctx
            .form()
            .into_iter()
            .filter(|(key, _)| key == "tag")
            .map(|(_, value)| value)
            .collect();
        assert_eq!(tags, vec!["a", "b&c"]);
        assert!(ctx.form_value("missing").is_none());
    }

    #[test]
    fn test_form_ignores_other_bodies() {
        let json = form_request("POST", "application/json", "name=ignored");
        assert_eq!(json.form_value("name").as_deref(), Some("query"));

        let get = form_request("GET", "application/x-www-form-urlencoded", "name=ignored");
        assert_eq!(get.form_value("name").as_deref(), Some("query"));
    }

    struct Heading;

    impl TemplateResolver for Heading {
        fn render(
            &self,
            name: &str,
            data: &Value,
            out: &mut dyn std::io::Write,
        ) -> Result<(), HandlerError> {
            match name {
                "heading" => {
                    let title = data["title"].as_str().unwrap_or_default();
                    write!(out, "<h1>{title}</h1>")?;
                    Ok(())
                }
                _ => Err(HandlerError::status(StatusCode::NOT_FOUND, "unknown template")),
            }
        }
    }

    #[tokio::test]
    async fn test_render_through_resolver() {
        let (mut ctx, rx) = context("GET", "/");
        assert!(ctx.render(StatusCode::OK, "heading", &serde_json::json!({})).is_err());

        ctx.response.clear();
        ctx.templates = Some(Arc::new(Heading));
        ctx.render(StatusCode::OK, "heading", &serde_json::json!({ "title": "Posts" }))
            .unwrap();
        ctx.response.finalize().unwrap();

        let (status, headers, body) = collect(rx).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["content-type"], "text/html; charset=utf-8");
        assert_eq!(body, "<h1>Posts</h1>");
    }

    #[test]
    fn test_data_bag_and_url_without_router() {
        let (mut ctx, _rx) = context("GET", "/");
        ctx.set("user_id", 7);
        assert_eq!(ctx.get("user_id"), Some(&Value::from(7)));
        assert_eq!(ctx.remove("user_id"), Some(Value::from(7)));
        assert!(matches!(ctx.url("home", &[]), Err(RouteError::UnknownRoute { .. })));
    }
}
