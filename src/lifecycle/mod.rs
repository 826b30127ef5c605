//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Connect engine → Start listeners
//!
//! Sync (startup.rs):
//!     Snapshot → Reconcile table → Subscribe → Apply events
//!     On subscription failure: back off → Reconnect → Snapshot again
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Cancel subscription → Stop accepting → Drain → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then the engine, then listeners
//! - One shutdown flag shared by servers and the sync task

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::run_sync;
