//! HTTP request handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, body buffering, request ID, tracing)
//!     → dispatcher.rs (route lookup, chain assembly)
//!     → handler.rs (middleware onion around the route handler)
//!     → context.rs (request view + response helpers for handlers)
//!     → buffer.rs (staged response, single commit to the sink)
//!     → Send to client
//! ```

pub mod buffer;
pub mod context;
pub mod cookie;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod server;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{ResponseBuffer, ResponseCollector, ResponseSink};
pub use context::RequestContext;
pub use cookie::{SameSite, SetCookie};
pub use error::{DispatchError, HandlerError, SessionError, SinkError};
pub use handler::{handler_fn, middleware_fn, wrap, BoxHandler, Handler, HandlerResult, Middleware, Next};
pub use server::HttpServer;
pub use services::{
    LogLevel, Logger, NopLogger, Session, SessionStatus, TemplateResolver, TracingLogger, User,
};
