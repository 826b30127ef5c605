//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → passed down to subsystems at startup
//! ```
//!
//! Routing topology is not part of this file; it is read from the
//! configuration store by the sync engine.
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, EngineConfig, ListenerConfig, ObservabilityConfig, ProxyConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
