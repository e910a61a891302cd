//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, every error reported)
//!     → JerryConfig (validated, immutable)
//!     → install.rs (plugin factories + context tree builder calls)
//!     → EngineBuilder → Engine
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; there is no reload
//! - All sections have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod install;
pub mod loader;
pub mod schema;
pub mod validation;

pub use install::install;
pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{ApplicationConfig, ContextConfig, EntryConfig, EntryKind, HttpServerConfig, JerryConfig};
pub use validation::{validate_config, ValidationError};
