//! Context tree subsystem.
//!
//! # Data Flow
//! ```text
//! Installation (builder.rs):
//!     add_context / add_endpoint / add_host / add_queue / add_object / add_*_handler
//!         → ContextTreeBuilder (mutable arena, pending entries)
//!
//! Freeze (builder.rs → tree.rs):
//!     initialize() → resolve refs → reject cycles → effective headers → object hooks
//!         → ContextTree (immutable, shared by every request thread)
//!
//! Lookup (tree.rs):
//!     find_object(ctx, id) → local → parents (while inherit_objects) → hidden
//! ```
//!
//! # Design Decisions
//! - Arena + `ContextId` handles instead of parent pointers
//! - One node type for every context flavor, tagged by `ContextKind`
//! - Entries are a sum type; exactly one routable thing per entry

pub mod builder;
pub mod entry;
pub mod node;
pub mod object;
pub mod tree;

pub use builder::ContextTreeBuilder;
pub use entry::{Component, Entry, ProcedureEntry};
pub use node::{ContextId, ContextKind, ErrorDocument, ResponseSettings};
pub use object::{downcast_object, Object, ObjectContext, ObjectScope};
pub use tree::{ContextNode, ContextTree};
