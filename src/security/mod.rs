//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (inside the middleware chain):
//!     → rate_limit.rs (per-client token buckets)
//!     → headers.rs (host allow-list, X-Frame-Options)
//!     → limits.rs (accepted body media types)
//!     → Pass to the route handler
//! ```
//!
//! # Design Decisions
//! - Every check is an ordinary middleware; routes opt in per group
//! - Fail closed: reject on any security check failure
//! - No trust in client input

pub mod headers;
pub mod limits;
pub mod rate_limit;

pub use headers::{allowed_hosts, x_frame_options, XFrameOption};
pub use limits::allow_content_type;
pub use rate_limit::RateLimiter;
