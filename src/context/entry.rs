//! Routable entries of a context.
//!
//! An entry holds exactly one routable thing. Entries are evaluated in
//! declaration order, so their position in the list matters.

use std::sync::Arc;

use crate::context::node::ContextId;
use crate::http::handler::RequestHandler;
use crate::lifecycle::procedures::Procedure;
use crate::messaging::handler::MessageHandler;

/// A component either owned inline or referenced by object id.
pub enum Component<T: ?Sized> {
    Owned(Arc<T>),
    /// Resolved against the object lookup chain at initialization.
    Ref(String),
}

/// Entry as declared on the builder, before references are resolved.
pub(crate) enum PendingEntry {
    Context(ContextId),
    RefContext(String),
    Endpoint(ContextId),
    Host(ContextId),
    Queue(ContextId),
    RequestHandler(Component<dyn RequestHandler>),
    MessageHandler(Component<dyn MessageHandler>),
    Procedure {
        procedure: Component<dyn Procedure>,
        threads: usize,
    },
}

/// A procedure entry with its worker count.
#[derive(Clone)]
pub struct ProcedureEntry {
    pub procedure: Arc<dyn Procedure>,
    pub threads: usize,
}

/// Resolved entry of a frozen context.
#[derive(Clone)]
pub enum Entry {
    /// Owned anonymous child context.
    Context(ContextId),
    /// Context installed elsewhere in the tree, resolved by id.
    RefContext(ContextId),
    Endpoint(ContextId),
    Host(ContextId),
    Queue(ContextId),
    RequestHandler(Arc<dyn RequestHandler>),
    MessageHandler(Arc<dyn MessageHandler>),
    Procedure(ProcedureEntry),
}

impl Entry {
    pub fn label(&self) -> &'static str {
        match self {
            Entry::Context(_) => "context",
            Entry::RefContext(_) => "ref-context",
            Entry::Endpoint(_) => "endpoint",
            Entry::Host(_) => "host",
            Entry::Queue(_) => "queue",
            Entry::RequestHandler(_) => "request-handler",
            Entry::MessageHandler(_) => "message-handler",
            Entry::Procedure(_) => "procedure",
        }
    }

    /// The context this entry leads into, for context-like entries.
    pub fn context(&self) -> Option<ContextId> {
        match self {
            Entry::Context(id)
            | Entry::RefContext(id)
            | Entry::Endpoint(id)
            | Entry::Host(id)
            | Entry::Queue(id) => Some(*id),
            _ => None,
        }
    }

    /// True when the entry owns the context it leads into.
    pub fn owns_context(&self) -> bool {
        matches!(
            self,
            Entry::Context(_) | Entry::Endpoint(_) | Entry::Host(_) | Entry::Queue(_)
        )
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.context() {
            Some(id) => write!(f, "{}({})", self.label(), id),
            None => f.write_str(self.label()),
        }
    }
}
