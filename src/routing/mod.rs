//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (host scope in declaration order)
//!     → trie.rs (endpoints matching the path, deepest first)
//!     → router.rs (first-match entry scan along the chain)
//!     → Return: response, or explicit "no handler"
//!
//! Table Compilation (at startup):
//!     Frozen ContextTree
//!     → Walk owned entries, join nested endpoint paths
//!     → Register each endpoint in its host's trie
//!     → Freeze as immutable HttpListener
//! ```
//!
//! # Design Decisions
//! - Tables compiled at startup, immutable at runtime
//! - No regex in hot path (segment tries only)
//! - Deterministic: same input always matches same context

pub mod matcher;
pub mod router;
pub mod trie;

pub use matcher::{EndpointPath, HostPattern};
pub use router::{HttpDispatch, HttpListener, RouteMatch};
pub use trie::EndpointEntry;
