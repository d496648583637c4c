//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → converted into BodyLimits / ManagerConfig for the core
//! ```
//!
//! # Design Decisions
//! - Every field has a default so an empty file is a valid config
//! - Validation separates syntactic (serde) from semantic checks
//! - Durations are stored as whole seconds in the file

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    Http2Config, LimitsConfig, ListenerConfig, ObservabilityConfig, ServerConfig, ShutdownConfig,
};
