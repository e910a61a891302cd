//! Object registry shared by every context node.
//!
//! # Responsibilities
//! - Own objects (configuration values, handlers, procedures) under string ids
//! - Expose capability casts so a referenced object can be used as a handler or procedure
//! - Provide the initialization hook run once after the whole tree exists
//!
//! # Design Decisions
//! - Objects are shared as `Arc<dyn Object>` and immutable after installation
//! - Re-adding an id replaces the previous object and hands it back to the caller
//! - Parent delegation is done by the tree, not here: this type only knows its local map

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::node::ContextId;
use crate::context::tree::ContextTree;
use crate::error::EngineResult;
use crate::http::handler::RequestHandler;
use crate::lifecycle::procedures::Procedure;
use crate::messaging::handler::MessageHandler;

/// Upcast to `Any` for typed lookups.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A component that can be registered in a context under an id.
pub trait Object: AsAny + Send + Sync {
    /// Resolve cross-references once the full tree exists.
    ///
    /// Called exactly once per object, top-down, while the tree is being frozen.
    fn initialize(&self, _scope: &ObjectScope<'_>) -> EngineResult<()> {
        Ok(())
    }

    fn as_request_handler(self: Arc<Self>) -> Option<Arc<dyn RequestHandler>> {
        None
    }

    fn as_message_handler(self: Arc<Self>) -> Option<Arc<dyn MessageHandler>> {
        None
    }

    fn as_procedure(self: Arc<Self>) -> Option<Arc<dyn Procedure>> {
        None
    }
}

/// Downcast a registered object to its concrete type.
pub fn downcast_object<T: Object>(object: &Arc<dyn Object>) -> Option<&T> {
    (**object).as_any().downcast_ref::<T>()
}

/// Local object map of one context.
#[derive(Default, Clone)]
pub struct ObjectContext {
    objects: HashMap<String, Arc<dyn Object>>,
}

impl ObjectContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object under `id`, returning the object it replaced, if any.
    pub fn add_object(
        &mut self,
        id: impl Into<String>,
        object: Arc<dyn Object>,
    ) -> Option<Arc<dyn Object>> {
        let id = id.into();
        let previous = self.objects.insert(id.clone(), object);
        if previous.is_some() {
            tracing::warn!(object_id = %id, "Object replaced an existing registration");
        }
        previous
    }

    /// Local lookup only.
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Object>> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.objects.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl std::fmt::Debug for ObjectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectContext")
            .field("ids", &self.ids())
            .finish()
    }
}

/// Lookup view handed to [`Object::initialize`].
#[derive(Clone, Copy)]
pub struct ObjectScope<'a> {
    tree: &'a ContextTree,
    context: ContextId,
}

impl<'a> ObjectScope<'a> {
    pub(crate) fn new(tree: &'a ContextTree, context: ContextId) -> Self {
        Self { tree, context }
    }

    /// The context the object is registered in.
    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn tree(&self) -> &'a ContextTree {
        self.tree
    }

    pub fn find_object(&self, id: &str) -> Option<&'a Arc<dyn Object>> {
        self.tree.find_object(self.context, id)
    }

    pub fn find_object_as<T: Object>(&self, id: &str) -> Option<&'a T> {
        self.tree.find_object_as::<T>(self.context, id)
    }
}
