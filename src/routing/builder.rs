//! Mutable route registration, frozen into a [`Router`] by `build`.
//!
//! # Responsibilities
//! - Register routes and groups under a parent scope
//! - Propagate middleware lists and the middleware-enabled flag
//! - Parse every pattern and report all failures at once
//!
//! # Design Decisions
//! - Nodes live in an arena indexed by [`NodeId`]; handles borrow the builder
//! - A child copies its parent's middleware list when it is registered
//! - A group's own middleware runs outside the middleware it inherits
//! - Groups are prepended to their parent's children, routes appended
//! - Paths are composed by plain concatenation of parent and child paths
//! - Duplicates are routes of one method whose patterns accept the same
//!   paths; the one reached first in match order wins

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;

use super::pattern::{PathPattern, SegmentShape};
use super::router::{Route, RouteError, RouteMethod, Router, ROOT};
use crate::config::RouterConfig;
use crate::http::dispatcher::default_not_found;
use crate::http::handler::{BoxHandler, Middleware};
use crate::http::services::{Logger, TemplateResolver};

/// Position of a node in a [`RouterBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

struct Node {
    method: Option<RouteMethod>,
    path: String,
    name: Option<String>,
    handler: Option<BoxHandler>,
    middleware: Vec<Middleware>,
    middleware_enabled: bool,
    children: Vec<usize>,
}

/// Collects routes before they are frozen.
pub struct RouterBuilder {
    nodes: Vec<Node>,
    global: Vec<Middleware>,
    config: RouterConfig,
    not_found: Option<BoxHandler>,
    logger: Option<Arc<dyn Logger>>,
    templates: Option<Arc<dyn TemplateResolver>>,
}

impl RouterBuilder {
    pub fn new(config: RouterConfig) -> Self {
        let root = Node {
            method: None,
            path: String::new(),
            name: None,
            handler: None,
            middleware: Vec::new(),
            middleware_enabled: true,
            children: Vec::new(),
        };
        Self {
            nodes: vec![root],
            global: Vec::new(),
            config,
            not_found: None,
            logger: None,
            templates: None,
        }
    }

    /// Handle on the implicit root group.
    pub fn root(&mut self) -> RouteHandle<'_> {
        RouteHandle { builder: self, id: ROOT }
    }

    /// Reopen a previously registered node.
    ///
    /// Returns `None` when `id` does not belong to this builder.
    pub fn scope(&mut self, id: NodeId) -> Option<RouteHandle<'_>> {
        if id.0 < self.nodes.len() {
            Some(RouteHandle { builder: self, id: id.0 })
        } else {
            None
        }
    }

    /// Append middleware that wraps every route with middleware enabled.
    pub fn use_middleware(&mut self, middleware: impl IntoIterator<Item = Middleware>) -> &mut Self {
        self.global.extend(middleware);
        self
    }

    /// Handler used when no route matches.
    pub fn not_found(&mut self, handler: BoxHandler) -> &mut Self {
        self.not_found = Some(handler);
        self
    }

    /// Logger installed on every request context.
    pub fn logger(&mut self, logger: Arc<dyn Logger>) -> &mut Self {
        self.logger = Some(logger);
        self
    }

    /// Template resolver installed on every request context.
    pub fn templates(&mut self, templates: Arc<dyn TemplateResolver>) -> &mut Self {
        self.templates = Some(templates);
        self
    }

    pub fn handle(
        &mut self,
        method: impl Into<RouteMethod>,
        path: &str,
        handler: BoxHandler,
    ) -> RouteHandle<'_> {
        let id = self.add_route(ROOT, method.into(), path, handler);
        RouteHandle { builder: self, id }
    }

    pub fn get(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::GET, path, handler)
    }

    pub fn post(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::POST, path, handler)
    }

    pub fn put(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::PUT, path, handler)
    }

    pub fn delete(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::DELETE, path, handler)
    }

    pub fn patch(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::PATCH, path, handler)
    }

    pub fn options(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::OPTIONS, path, handler)
    }

    pub fn head(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::HEAD, path, handler)
    }

    pub fn any(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(RouteMethod::Any, path, handler)
    }

    pub fn group(&mut self, path: &str, name: &str, middleware: Vec<Middleware>) -> RouteHandle<'_> {
        let id = self.add_group(ROOT, path, name, middleware);
        RouteHandle { builder: self, id }
    }

    fn add_route(&mut self, parent: usize, method: RouteMethod, path: &str, handler: BoxHandler) -> usize {
        let id = self.nodes.len();
        let node = {
            let parent = &self.nodes[parent];
            Node {
                method: Some(method),
                path: format!("{}{}", parent.path, path),
                name: None,
                handler: Some(handler),
                middleware: parent.middleware.clone(),
                middleware_enabled: parent.middleware_enabled,
                children: Vec::new(),
            }
        };
        self.nodes.push(node);
        self.nodes[parent].children.push(id);
        id
    }

    fn add_group(&mut self, parent: usize, path: &str, name: &str, middleware: Vec<Middleware>) -> usize {
        let id = self.nodes.len();
        let node = {
            let parent = &self.nodes[parent];
            let mut middleware = middleware;
            middleware.extend(parent.middleware.iter().cloned());
            Node {
                method: None,
                path: format!("{}{}", parent.path, path),
                name: (!name.is_empty()).then(|| name.to_string()),
                handler: None,
                middleware,
                middleware_enabled: parent.middleware_enabled,
                children: Vec::new(),
            }
        };
        self.nodes.push(node);
        self.nodes[parent].children.insert(0, id);
        id
    }

    fn append_middleware(&mut self, id: usize, middleware: &[Middleware]) {
        self.nodes[id].middleware.extend(middleware.iter().cloned());
        for child in self.nodes[id].children.clone() {
            self.append_middleware(child, middleware);
        }
    }

    fn disable(&mut self, id: usize) {
        self.nodes[id].middleware_enabled = false;
        for child in self.nodes[id].children.clone() {
            self.disable(child);
        }
    }

    /// Parse every pattern and freeze the tree.
    pub fn build(self) -> Result<Router, RouteError> {
        let mut errors = Vec::new();
        let mut routes = Vec::with_capacity(self.nodes.len());

        for (id, node) in self.nodes.into_iter().enumerate() {
            let pattern = if id == ROOT {
                PathPattern::parse("/")
            } else {
                PathPattern::parse(&node.path)
            };
            let pattern = match pattern {
                Ok(pattern) => pattern,
                Err(err) => {
                    errors.push(RouteError::Pattern(err));
                    continue;
                }
            };

            routes.push(Route {
                method: node.method,
                pattern,
                name: node.name,
                handler: node.handler,
                middleware: node.middleware,
                middleware_enabled: node.middleware_enabled,
                children: node.children,
            });
        }

        if errors.is_empty() {
            errors = find_duplicates(&routes, self.config.reject_duplicate_routes);
        }
        if !errors.is_empty() {
            return Err(RouteError::Build(errors));
        }

        Ok(Router {
            routes,
            global: self.global,
            config: self.config,
            not_found: self.not_found.unwrap_or_else(default_not_found),
            logger: self.logger,
            templates: self.templates,
        })
    }
}

/// Walk the frozen tree in match order and report routes that an earlier
/// route of the same method always shadows.
fn find_duplicates(routes: &[Route], reject: bool) -> Vec<RouteError> {
    let mut errors = Vec::new();
    let mut seen: HashMap<(String, Vec<SegmentShape<'_>>), &str> = HashMap::new();
    let mut stack = vec![ROOT];

    while let Some(id) = stack.pop() {
        let route = &routes[id];
        stack.extend(route.children.iter().rev());

        let (Some(method), Some(_)) = (&route.method, &route.handler) else {
            continue;
        };
        match seen.entry((method.to_string(), route.pattern.shape())) {
            Entry::Vacant(slot) => {
                slot.insert(route.pattern.as_str());
            }
            Entry::Occupied(winner) if reject => {
                tracing::debug!(shadowed_by = %winner.get(), "duplicate route");
                errors.push(RouteError::Duplicate {
                    method: method.clone(),
                    pattern: route.pattern.as_str().to_string(),
                });
            }
            Entry::Occupied(winner) => {
                tracing::warn!(
                    method = %method,
                    pattern = %route.pattern,
                    shadowed_by = %winner.get(),
                    "duplicate route is unreachable"
                );
            }
        }
    }

    errors
}

/// Mutable view of one registered node.
///
/// Registering through a handle places the new node under it.
pub struct RouteHandle<'a> {
    builder: &'a mut RouterBuilder,
    id: usize,
}

impl<'a> RouteHandle<'a> {
    pub fn id(&self) -> NodeId {
        NodeId(self.id)
    }

    pub fn name(self, name: &str) -> Self {
        self.builder.nodes[self.id].name = Some(name.to_string());
        self
    }

    /// Append middleware to this node and every existing descendant. On the
    /// root this extends the global list instead.
    pub fn use_middleware(self, middleware: impl IntoIterator<Item = Middleware>) -> Self {
        let middleware: Vec<Middleware> = middleware.into_iter().collect();
        if self.id == ROOT {
            self.builder.global.extend(middleware);
        } else {
            self.builder.append_middleware(self.id, &middleware);
        }
        self
    }

    /// Turn middleware off for this node and its descendants, present and
    /// future.
    pub fn disable_middleware(self) -> Self {
        self.builder.disable(self.id);
        self
    }

    pub fn handle(
        &mut self,
        method: impl Into<RouteMethod>,
        path: &str,
        handler: BoxHandler,
    ) -> RouteHandle<'_> {
        let id = self.builder.add_route(self.id, method.into(), path, handler);
        RouteHandle { builder: &mut *self.builder, id }
    }

    pub fn get(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::GET, path, handler)
    }

    pub fn post(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::POST, path, handler)
    }

    pub fn put(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::PUT, path, handler)
    }

    pub fn delete(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::DELETE, path, handler)
    }

    pub fn patch(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::PATCH, path, handler)
    }

    pub fn options(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::OPTIONS, path, handler)
    }

    pub fn head(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(Method::HEAD, path, handler)
    }

    pub fn any(&mut self, path: &str, handler: BoxHandler) -> RouteHandle<'_> {
        self.handle(RouteMethod::Any, path, handler)
    }

    pub fn group(&mut self, path: &str, name: &str, middleware: Vec<Middleware>) -> RouteHandle<'_> {
        let id = self.builder.add_group(self.id, path, name, middleware);
        RouteHandle { builder: &mut *self.builder, id }
    }
}
