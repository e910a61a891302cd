//! Application subsystem.
//!
//! # Data Flow
//! ```text
//! Installation:
//!     add_application(name) → application context under global
//!     add_http_listener / add_basic_listener → listener contexts (hidden = global)
//!
//! Initialization:
//!     initialization_order → [global, applications by name]
//!     install(frozen tree) → ApplicationRuntime { HttpListener, BasicListener }
//! ```

pub mod registry;

pub use registry::{Application, ApplicationRuntime, Applications};
