//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (ordered route lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → handlers.rs / files (matched handler) or 404
//!
//! Route Compilation (at startup):
//!     RouteConfig[] → compile matchers → freeze as immutable Router
//! ```

pub mod handlers;
pub mod matcher;
pub mod router;

pub use handlers::{Echo, WebSocketEcho};
pub use matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};
pub use router::{Route, RouteError, Router};
