//! Component plugins.
//!
//! # Data Flow
//! ```text
//! Config entry (implementation + settings)
//!     → registry.rs (factory lookup by name)
//!     → Arc<dyn Object>
//!     → context tree (as object, request handler, message handler or procedure)
//! ```
//!
//! # Design Decisions
//! - Implementations are resolved by name when the config is installed, not at request time
//! - Factories only validate settings; cross-references resolve in `Object::initialize`

pub mod builtin;
pub mod registry;

pub use registry::{PluginFactory, PluginRegistry, Settings};
