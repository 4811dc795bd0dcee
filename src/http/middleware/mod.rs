//! Stock middleware for the dispatch chain.
//!
//! # Data Flow
//! ```text
//! Request
//!     → logging.rs (logger install, request line)
//!     → recoverer.rs (Err and panic recovery)
//!     → gzip.rs (compress the finished body)
//!     → session.rs (load session by cookie)
//!     → auth.rs (login / logout gates)
//!     → cache.rs (cache-control headers)
//!     → handler
//! ```
//!
//! Security checks (rate limiting, host allow-list, media types) live in
//! [`crate::security`].

pub mod auth;
pub mod cache;
pub mod gzip;
pub mod logging;
pub mod recoverer;
pub mod session;

pub use auth::{login_required, login_required_with, logout_required, logout_required_with};
pub use cache::{cache, no_cache};
pub use gzip::{gzip, gzip_with};
pub use logging::{add_logger, request_logger};
pub use recoverer::{default_recoverer, recoverer, ErrorHandler};
pub use session::{sessions, MemorySessionStore, SessionConfig, SessionStore};
