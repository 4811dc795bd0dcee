//! Frozen route table: lookup, reverse routing and traversal.
//!
//! # Responsibilities
//! - Hold the route tree produced by [`RouterBuilder`](super::builder::RouterBuilder)
//! - Find the first route matching a method and path
//! - Resolve colon-separated route names back to patterns
//!
//! # Design Decisions
//! - Immutable after construction (shared through `Arc` without locks)
//! - Depth-first search in stored child order; first full match wins
//! - A node only terminates the search when it has a handler and accepts the
//!   method; children are searched regardless
//! - Groups are stored ahead of their older siblings, so the newest group is
//!   tried first

use std::fmt;
use std::sync::Arc;

use axum::http::Method;
use thiserror::Error;

use super::params::UrlParams;
use super::pattern::{PathPattern, PatternError};
use crate::config::RouterConfig;
use crate::http::handler::{BoxHandler, Middleware};
use crate::http::services::{Logger, TemplateResolver};

/// Method a route answers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMethod {
    /// Every method.
    Any,
    Exact(Method),
}

impl RouteMethod {
    /// Whether a node registered with `self` serves a request with `method`.
    pub fn accepts(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(m) => m == method,
        }
    }
}

impl From<Method> for RouteMethod {
    fn from(method: Method) -> Self {
        Self::Exact(method)
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("ANY"),
            Self::Exact(m) => f.write_str(m.as_str()),
        }
    }
}

/// Errors from building the route table or resolving route names.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("duplicate route {method} {pattern}")]
    Duplicate { method: RouteMethod, pattern: String },

    #[error("no route named `{name}`")]
    UnknownRoute { name: String },

    #[error("invalid route table: {}", summarize(.0))]
    Build(Vec<RouteError>),
}

fn summarize(errors: &[RouteError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One node of the frozen route tree.
pub struct Route {
    pub(crate) method: Option<RouteMethod>,
    pub(crate) pattern: PathPattern,
    pub(crate) name: Option<String>,
    pub(crate) handler: Option<BoxHandler>,
    pub(crate) middleware: Vec<Middleware>,
    pub(crate) middleware_enabled: bool,
    pub(crate) children: Vec<usize>,
}

impl Route {
    /// `None` for groups.
    pub fn method(&self) -> Option<&RouteMethod> {
        self.method.as_ref()
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_group(&self) -> bool {
        self.handler.is_none()
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    pub fn middleware_enabled(&self) -> bool {
        self.middleware_enabled
    }

    fn serves(&self, method: &Method) -> bool {
        self.handler.is_some() && self.method.as_ref().is_some_and(|m| m.accepts(method))
    }

    /// Reverse-lookup method check: equal, route `Any`, or query `Any`.
    /// Groups only answer `Any` queries.
    fn answers(&self, query: &RouteMethod) -> bool {
        match (query, &self.method) {
            (RouteMethod::Any, _) => true,
            (_, Some(RouteMethod::Any)) => true,
            (query, Some(own)) => query == own,
            (_, None) => false,
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("name", &self.name)
            .field("middleware", &self.middleware.len())
            .field("middleware_enabled", &self.middleware_enabled)
            .field("children", &self.children)
            .finish()
    }
}

/// A successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: UrlParams,
}

/// Immutable route table shared by every request.
pub struct Router {
    pub(crate) routes: Vec<Route>,
    pub(crate) global: Vec<Middleware>,
    pub(crate) config: RouterConfig,
    pub(crate) not_found: BoxHandler,
    pub(crate) logger: Option<Arc<dyn Logger>>,
    pub(crate) templates: Option<Arc<dyn TemplateResolver>>,
}

pub(crate) const ROOT: usize = 0;

impl Router {
    pub fn builder(config: RouterConfig) -> super::builder::RouterBuilder {
        super::builder::RouterBuilder::new(config)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Number of route nodes, groups included, excluding the root.
    pub fn len(&self) -> usize {
        self.routes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn global_middleware_count(&self) -> usize {
        self.global.len()
    }

    /// Find the first route serving `method` at `path`.
    pub fn match_route(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.find(ROOT, method, path)
    }

    fn find(&self, id: usize, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        let route = &self.routes[id];
        if route.serves(method) {
            if let Some(params) = route.pattern.matches(path) {
                return Some(RouteMatch { route, params });
            }
        }
        route
            .children
            .iter()
            .find_map(|&child| self.find(child, method, path))
    }

    /// Resolve a colon-separated name such as `blog:post:edit`.
    ///
    /// Each name part selects among the direct children of the previous one.
    /// Siblings sharing a name are tried in order.
    pub fn url(&self, method: &RouteMethod, name: &str) -> Option<&PathPattern> {
        let parts: Vec<&str> = name.split(':').collect();
        self.lookup(ROOT, method, &parts)
            .map(|id| &self.routes[id].pattern)
    }

    fn lookup(&self, parent: usize, method: &RouteMethod, parts: &[&str]) -> Option<usize> {
        let (first, rest) = parts.split_first()?;
        self.routes[parent].children.iter().copied().find_map(|id| {
            let route = &self.routes[id];
            if route.name.as_deref() != Some(*first) {
                return None;
            }
            if rest.is_empty() {
                route.answers(method).then_some(id)
            } else {
                self.lookup(id, method, rest)
            }
        })
    }

    /// Named route formatted with positional arguments.
    pub fn reverse(&self, name: &str, args: &[&dyn fmt::Display]) -> Result<String, RouteError> {
        let pattern = self
            .url(&RouteMethod::Any, name)
            .ok_or_else(|| RouteError::UnknownRoute { name: name.to_string() })?;
        Ok(pattern.format(args)?)
    }

    /// Visit every node depth-first with its depth (top-level routes are 0).
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(&Route, usize),
    {
        for &child in &self.routes[ROOT].children {
            self.walk_from(child, 0, &mut f);
        }
    }

    fn walk_from<F>(&self, id: usize, depth: usize, f: &mut F)
    where
        F: FnMut(&Route, usize),
    {
        let route = &self.routes[id];
        f(route, depth);
        for &child in &route.children {
            self.walk_from(child, depth + 1, f);
        }
    }

    /// Emit the route table as debug events.
    pub fn log_routes(&self) {
        self.walk(|route, depth| {
            let method = route
                .method()
                .map(ToString::to_string)
                .unwrap_or_else(|| "GROUP".to_string());
            tracing::debug!(
                depth,
                method = %method,
                pattern = %route.pattern(),
                name = route.name().unwrap_or(""),
                middleware = route.middleware_count(),
                "route"
            );
        });
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.len())
            .field("global_middleware", &self.global.len())
            .field("config", &self.config)
            .field("logger", &self.logger.is_some())
            .field("templates", &self.templates.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;

    fn noop() -> BoxHandler {
        handler_fn(|_ctx| Box::pin(async { Ok(()) }))
    }

    fn blog_router() -> Router {
        let mut builder = Router::builder(RouterConfig::default());
        builder.get("/", noop()).name("home");
        {
            let mut blog = builder.group("/blog", "blog", Vec::new());
            blog.get("/<slug:slug>", noop()).name("post");
            blog.post("/<slug:slug>", noop()).name("post");
            let mut admin = blog.group("/admin", "admin", Vec::new());
            admin.get("/edit/<id:int>", noop()).name("edit");
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_match_binds_params() {
        let router = blog_router();

        let hit = router.match_route(&Method::GET, "/blog/hello-world").unwrap();
        assert_eq!(hit.route.name(), Some("post"));
        assert_eq!(hit.params.get("slug"), Some("hello-world"));

        let hit = router.match_route(&Method::GET, "/blog/admin/edit/9").unwrap();
        assert_eq!(hit.params.get("id"), Some("9"));

        assert!(router.match_route(&Method::DELETE, "/blog/hello").is_none());
        assert!(router.match_route(&Method::GET, "/nowhere").is_none());
    }

    #[test]
    fn test_method_selects_sibling() {
        let router = blog_router();
        let hit = router.match_route(&Method::POST, "/blog/x").unwrap();
        assert_eq!(hit.route.method(), Some(&RouteMethod::Exact(Method::POST)));
    }

    #[test]
    fn test_nested_names() {
        let router = blog_router();

        assert_eq!(router.url(&RouteMethod::Any, "home").unwrap().as_str(), "/");
        assert_eq!(
            router.url(&Method::GET.into(), "blog:admin:edit").unwrap().as_str(),
            "/blog/admin/edit/<id:int>"
        );
        assert!(router.url(&Method::POST.into(), "blog:admin:edit").is_none());
        assert_eq!(router.reverse("blog:post", &[&"rust"]).unwrap(), "/blog/rust");
        assert!(router.url(&RouteMethod::Any, "blog:missing").is_none());
        assert!(matches!(
            router.reverse("nope", &[]),
            Err(RouteError::UnknownRoute { .. })
        ));
    }

    #[test]
    fn test_group_answers_only_any() {
        let router = blog_router();
        assert!(router.url(&RouteMethod::Any, "blog").is_some());
        assert!(router.url(&Method::GET.into(), "blog").is_none());
    }

    #[test]
    fn test_reverse_checks_argument_count() {
        let router = blog_router();
        assert!(matches!(
            router.reverse("blog:admin:edit", &[]),
            Err(RouteError::Pattern(PatternError::MissingArguments { .. }))
        ));
    }

    #[test]
    fn test_walk_depths() {
        let router = blog_router();
        let mut seen = Vec::new();
        router.walk(|route, depth| seen.push((route.pattern().as_str().to_string(), depth)));

        assert_eq!(
            seen,
            vec![
                ("/blog".to_string(), 0),
                ("/blog/admin".to_string(), 1),
                ("/blog/admin/edit/<id:int>".to_string(), 2),
                ("/blog/<slug:slug>".to_string(), 1),
                ("/blog/<slug:slug>".to_string(), 1),
                ("/".to_string(), 0),
            ]
        );
    }
}
