//! Queue message and its request-scoped context.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::context::node::ContextId;
use crate::context::object::{downcast_object, Object};
use crate::context::tree::ContextTree;

/// A message delivered to a basic listener, keyed by queue name.
#[derive(Debug, Clone)]
pub struct Message {
    id: Uuid,
    queue: String,
    headers: BTreeMap<String, String>,
    payload: Bytes,
}

impl Message {
    pub fn new(queue: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            headers: BTreeMap::new(),
            payload: payload.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// A message bound to the context whose entry is consuming it.
#[derive(Clone, Copy)]
pub struct MessageContext<'a> {
    message: &'a Message,
    tree: &'a ContextTree,
    context: ContextId,
}

impl<'a> MessageContext<'a> {
    pub fn new(message: &'a Message, tree: &'a ContextTree, context: ContextId) -> Self {
        Self { message, tree, context }
    }

    pub fn message(&self) -> &'a Message {
        self.message
    }

    pub fn tree(&self) -> &'a ContextTree {
        self.tree
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn find_object(&self, id: &str) -> Option<&'a Arc<dyn Object>> {
        self.tree.find_object(self.context, id)
    }

    pub fn find_object_as<T: Object>(&self, id: &str) -> Option<&'a T> {
        self.find_object(id).and_then(downcast_object::<T>)
    }
}
