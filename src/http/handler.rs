//! Handler and middleware abstractions.
//!
//! A handler is anything that can serve a [`RequestContext`]. A middleware is
//! a function from handler to handler; wrapping is done per request by the
//! dispatcher so the outermost middleware sees the request first.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use super::context::RequestContext;
use super::error::HandlerError;

pub type HandlerResult = Result<(), HandlerError>;

/// Something that can serve a request.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: &mut RequestContext) -> HandlerResult;
}

/// Shared, type-erased handler.
pub type BoxHandler = Arc<dyn Handler>;

/// Handler-to-handler transformer.
pub type Middleware = Arc<dyn Fn(BoxHandler) -> BoxHandler + Send + Sync>;

/// Adapter turning a closure into a [`Handler`].
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    async fn call(&self, ctx: &mut RequestContext) -> HandlerResult {
        (self.f)(ctx).await
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandlerFn")
    }
}

/// Build a handler from an async closure.
///
/// ```ignore
/// let hello = handler_fn(|ctx| Box::pin(async move {
///     ctx.response.write_str("hello");
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> BoxHandler
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(HandlerFn { f })
}

/// The rest of the chain, handed to a middleware built with [`middleware_fn`].
#[derive(Clone)]
pub struct Next {
    inner: BoxHandler,
}

impl Next {
    pub fn new(inner: BoxHandler) -> Self {
        Self { inner }
    }

    /// Run the wrapped handler.
    pub async fn run(self, ctx: &mut RequestContext) -> HandlerResult {
        self.inner.call(ctx).await
    }
}

struct FromFn<F> {
    f: Arc<F>,
    next: BoxHandler,
}

#[async_trait]
impl<F> Handler for FromFn<F>
where
    F: for<'a> Fn(&'a mut RequestContext, Next) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    async fn call(&self, ctx: &mut RequestContext) -> HandlerResult {
        (self.f)(ctx, Next::new(self.next.clone())).await
    }
}

/// Build a middleware from an async closure that receives the request and
/// the rest of the chain.
///
/// Code before `next.run(ctx)` runs on the way in, code after it on the way
/// out. Not calling `next` short-circuits the chain.
pub fn middleware_fn<F>(f: F) -> Middleware
where
    F: for<'a> Fn(&'a mut RequestContext, Next) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: BoxHandler| -> BoxHandler {
        Arc::new(FromFn { f: Arc::clone(&f), next })
    })
}

/// Wrap `handler` so that `middleware[0]` is outermost.
pub fn wrap(handler: BoxHandler, middleware: &[Middleware]) -> BoxHandler {
    middleware.iter().rev().fold(handler, |inner, mw| mw(inner))
}
