//! Jerry: an application server that routes HTTP requests and queue messages
//! through a tree of nested contexts to pluggable handlers.

// Core engine
pub mod context;
pub mod engine;
pub mod error;
pub mod routing;

// Transports
pub mod http;
pub mod messaging;

// Composition
pub mod application;
pub mod config;
pub mod plugin;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::JerryConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, EngineResult, HandlerError, PluginError};
pub use lifecycle::{Jerry, LifecycleError};
pub use plugin::PluginRegistry;
