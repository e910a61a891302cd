//! Basic (queue) listener dispatch.
//!
//! # Responsibilities
//! - Map queue names to every context registered for them
//! - Fan a message out to all registrations of its queue
//! - Contain handler failures per registration
//!
//! # Design Decisions
//! - Fan-out across registrations, first-match within one registration
//! - Registration order follows declaration order in the tree
//! - A queue without registrations falls back to the listener root entries

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::context::entry::Entry;
use crate::context::node::{ContextId, ContextKind};
use crate::context::tree::ContextTree;
use crate::error::{EngineError, EngineResult};
use crate::messaging::handler::MessageHandler;
use crate::messaging::message::{Message, MessageContext};
use crate::observability::metrics;

/// Outcome of delivering one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Registrations the message was offered to.
    pub registrations: usize,
    /// Registrations in which a handler consumed it.
    pub consumed: usize,
}

impl Delivery {
    pub fn merge(self, other: Delivery) -> Delivery {
        Delivery {
            registrations: self.registrations + other.registrations,
            consumed: self.consumed + other.consumed,
        }
    }
}

/// Routing table of a basic listener context.
#[derive(Debug, Clone)]
pub struct BasicListener {
    root: ContextId,
    queues: HashMap<String, Vec<ContextId>>,
}

impl BasicListener {
    pub fn new(root: ContextId) -> Self {
        Self {
            root,
            queues: HashMap::new(),
        }
    }

    /// Register every queue context reachable from `root` through owned entries.
    pub fn build(tree: &ContextTree, root: ContextId) -> EngineResult<Self> {
        let mut listener = Self::new(root);
        listener.register(tree, root)?;
        debug!(listener = %root, queues = listener.queues.len(), "Basic listener routing table built");
        Ok(listener)
    }

    fn register(&mut self, tree: &ContextTree, context: ContextId) -> EngineResult<()> {
        for entry in tree.entries(context) {
            match entry {
                Entry::Context(child) => self.register(tree, *child)?,
                Entry::Queue(child) => {
                    if let ContextKind::Queue(name) = tree.kind(*child) {
                        self.register_handler_data(name, *child);
                    }
                    self.register(tree, *child)?;
                }
                Entry::Endpoint(_) | Entry::Host(_) | Entry::RequestHandler(_) => {
                    return Err(EngineError::WrongListenerKind {
                        entry: entry.label(),
                        listener: "basic",
                    })
                }
                Entry::RefContext(_) | Entry::MessageHandler(_) | Entry::Procedure(_) => {}
            }
        }
        Ok(())
    }

    /// Add a registration for `queue`. Repeated registrations all receive messages.
    pub fn register_handler_data(&mut self, queue: &str, context: ContextId) {
        self.queues.entry(queue.to_string()).or_default().push(context);
    }

    pub fn root(&self) -> ContextId {
        self.root
    }

    /// Registered queue names, sorted.
    pub fn queues(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.queues.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn registrations(&self, queue: &str) -> &[ContextId] {
        self.queues.get(queue).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Offer `message` to every registration of its queue.
    pub fn deliver(&self, tree: &ContextTree, message: &Message) -> Delivery {
        let fallback = [self.root];
        let registrations = match self.queues.get(message.queue()) {
            Some(contexts) => contexts.as_slice(),
            None => &fallback,
        };

        let mut delivery = Delivery::default();
        for context in registrations {
            delivery.registrations += 1;
            if scan_entries(tree, message, *context) {
                delivery.consumed += 1;
            }
        }

        metrics::record_message_delivered(message.queue());
        debug!(
            message_id = %message.id(),
            queue = %message.queue(),
            registrations = delivery.registrations,
            consumed = delivery.consumed,
            "Message delivered"
        );
        delivery
    }
}

fn scan_entries(tree: &ContextTree, message: &Message, context: ContextId) -> bool {
    for entry in tree.entries(context) {
        match entry {
            Entry::Context(child) | Entry::RefContext(child) => {
                if scan_entries(tree, message, *child) {
                    return true;
                }
            }
            Entry::MessageHandler(handler) => {
                if invoke(handler, &MessageContext::new(message, tree, context)) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

fn invoke(handler: &Arc<dyn MessageHandler>, message: &MessageContext<'_>) -> bool {
    let message_id = message.message().id();
    match panic::catch_unwind(AssertUnwindSafe(|| handler.consume(message))) {
        Ok(Ok(consumed)) => consumed,
        Ok(Err(e)) => {
            warn!(message_id = %message_id, context = %message.context(), error = %e, "Message handler failed");
            metrics::record_handler_error("message");
            false
        }
        Err(_) => {
            error!(message_id = %message_id, context = %message.context(), "Message handler panicked");
            metrics::record_handler_error("message");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::builder::ContextTreeBuilder;
    use crate::context::entry::Component;
    use crate::error::HandlerError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
        consume: bool,
    }

    impl Recording {
        fn consuming() -> Arc<Self> {
            Arc::new(Self {
                consume: true,
                ..Self::default()
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl MessageHandler for Recording {
        fn consume(&self, message: &MessageContext<'_>) -> Result<bool, HandlerError> {
            let payload = message.message().payload_str().unwrap_or_default().to_string();
            self.seen.lock().unwrap().push(payload);
            Ok(self.consume)
        }
    }

    struct Failing;

    impl MessageHandler for Failing {
        fn consume(&self, _message: &MessageContext<'_>) -> Result<bool, HandlerError> {
            Err(HandlerError::Failed("broken".into()))
        }
    }

    #[test]
    fn test_queue_fan_out() {
        let a = Recording::consuming();
        let b = Recording::consuming();

        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let first = builder.add_queue(root, "orders");
        builder.add_message_handler(first, Component::Owned(a.clone()));
        let second = builder.add_queue(root, "orders");
        builder.add_message_handler(second, Component::Owned(b.clone()));
        let tree = builder.initialize().unwrap();
        let listener = BasicListener::build(&tree, root).unwrap();

        let delivery = listener.deliver(&tree, &Message::new("orders", "order-1"));
        assert_eq!(delivery, Delivery { registrations: 2, consumed: 2 });
        assert_eq!(a.seen(), vec!["order-1"]);
        assert_eq!(b.seen(), vec!["order-1"]);
    }

    #[test]
    fn test_first_match_within_registration() {
        let first = Recording::consuming();
        let second = Recording::consuming();

        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let queue = builder.add_queue(root, "events");
        builder.add_message_handler(queue, Component::Owned(Arc::new(Failing)));
        builder.add_message_handler(queue, Component::Owned(first.clone()));
        builder.add_message_handler(queue, Component::Owned(second.clone()));
        let tree = builder.initialize().unwrap();
        let listener = BasicListener::build(&tree, root).unwrap();

        let delivery = listener.deliver(&tree, &Message::new("events", "e"));
        assert_eq!(delivery.consumed, 1);
        assert_eq!(first.seen(), vec!["e"]);
        assert!(second.seen().is_empty());
    }

    #[test]
    fn test_unregistered_queue_uses_root_entries() {
        let fallback = Recording::consuming();
        let orders = Recording::consuming();

        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let queue = builder.add_queue(root, "orders");
        builder.add_message_handler(queue, Component::Owned(orders.clone()));
        builder.add_message_handler(root, Component::Owned(fallback.clone()));
        let tree = builder.initialize().unwrap();
        let listener = BasicListener::build(&tree, root).unwrap();

        let delivery = listener.deliver(&tree, &Message::new("audit", "a"));
        assert_eq!(delivery, Delivery { registrations: 1, consumed: 1 });
        assert_eq!(fallback.seen(), vec!["a"]);
        assert!(orders.seen().is_empty());
        assert_eq!(listener.queues(), vec!["orders"]);
    }

    #[test]
    fn test_http_entries_rejected() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        builder.add_endpoint(root, "/a");
        let tree = builder.initialize().unwrap();
        assert!(matches!(
            BasicListener::build(&tree, root),
            Err(EngineError::WrongListenerKind { entry: "endpoint", listener: "basic" })
        ));
    }
}
