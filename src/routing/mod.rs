//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Registration (at startup):
//!     RouterBuilder::get / post / group / use_middleware
//!     → builder.rs (arena of nodes, middleware copied into children)
//!     → build(): parse every pattern, collect errors, check duplicates
//!     → Freeze as immutable Router
//!
//! Incoming Request (method, path)
//!     → router.rs (depth-first lookup in stored order)
//!     → pattern.rs (segment matching, typed variables)
//!     → Return: RouteMatch { route, params } or None
//! ```
//!
//! # Design Decisions
//! - Routes registered at startup, immutable at runtime
//! - No regex in the hot path (per-segment character checks)
//! - Deterministic: same input always matches the same route
//! - First full match wins

pub mod builder;
pub mod params;
pub mod pattern;
pub mod router;

pub use builder::{NodeId, RouteHandle, RouterBuilder};
pub use params::UrlParams;
pub use pattern::{PathPattern, PatternError};
pub use router::{Route, RouteError, RouteMatch, RouteMethod, Router};
