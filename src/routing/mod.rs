//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! ChangeEvent stream (from the sync engine)
//!     → table.rs (compile and store entities)
//!
//! Incoming Request (host, path, method)
//!     → matcher.rs (RouteContext)
//!     → table.rs (best matching frontend)
//!     → Return: service chain for that frontend, or no match
//! ```
//!
//! # Design Decisions
//! - Routes are predicate expressions compiled once per change
//! - `PathRegexp` patterns are compiled with the route, never per request
//! - Deterministic: the longest matching route wins, ties by frontend id

pub mod matcher;
pub mod table;

pub use matcher::{compile_route, RouteContext};
pub use table::{ProxyService, Resolved, RouteTable};
