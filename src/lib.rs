//! HTTP request router with middleware groups, reverse routing and
//! per-client rate limiting.

// Core subsystems
pub mod config;
pub mod http;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::AppConfig;
pub use http::{HttpServer, RequestContext};
pub use lifecycle::Shutdown;
pub use routing::{Router, RouterBuilder};
