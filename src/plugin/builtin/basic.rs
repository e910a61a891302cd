//! Built-in message handlers.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::context::object::Object;
use crate::error::{HandlerError, PluginError};
use crate::messaging::handler::MessageHandler;
use crate::messaging::message::{Message, MessageContext};
use crate::plugin::registry::Settings;

/// Logs each message.
///
/// Settings: `consume` (true). With `consume = false` the next entry of the
/// same registration still sees the message.
pub struct LogHandler {
    consume: bool,
}

impl LogHandler {
    pub fn from_settings(settings: &Settings) -> Result<Self, PluginError> {
        Ok(Self {
            consume: settings.parse("consume")?.unwrap_or(true),
        })
    }
}

impl Object for LogHandler {
    fn as_message_handler(self: Arc<Self>) -> Option<Arc<dyn MessageHandler>> {
        Some(self)
    }
}

impl MessageHandler for LogHandler {
    fn consume(&self, message: &MessageContext<'_>) -> Result<bool, HandlerError> {
        let msg = message.message();
        info!(
            message_id = %msg.id(),
            queue = %msg.queue(),
            context = %message.context(),
            bytes = msg.payload().len(),
            "Message received"
        );
        Ok(self.consume)
    }
}

/// Keeps every consumed message in memory.
#[derive(Default)]
pub struct CollectHandler {
    messages: Mutex<Vec<Message>>,
}

impl CollectHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the messages seen so far.
    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Object for CollectHandler {
    fn as_message_handler(self: Arc<Self>) -> Option<Arc<dyn MessageHandler>> {
        Some(self)
    }
}

impl MessageHandler for CollectHandler {
    fn consume(&self, message: &MessageContext<'_>) -> Result<bool, HandlerError> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.message().clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::builder::ContextTreeBuilder;

    #[test]
    fn test_log_consume_setting() {
        let tree = ContextTreeBuilder::new().initialize().unwrap();
        let message = Message::new("orders", "x");
        let context = MessageContext::new(&message, &tree, tree.root());

        let default = LogHandler::from_settings(&Settings::new()).unwrap();
        assert!(default.consume(&context).unwrap());

        let passive = LogHandler::from_settings(&Settings::new().with("consume", "false")).unwrap();
        assert!(!passive.consume(&context).unwrap());

        assert!(LogHandler::from_settings(&Settings::new().with("consume", "maybe")).is_err());
    }

    #[test]
    fn test_collect_keeps_messages() {
        let tree = ContextTreeBuilder::new().initialize().unwrap();
        let handler = CollectHandler::new();
        for payload in ["a", "b"] {
            let message = Message::new("q", payload);
            assert!(handler.consume(&MessageContext::new(&message, &tree, tree.root())).unwrap());
        }
        let seen: Vec<_> = handler
            .messages()
            .iter()
            .map(|m| m.payload_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(seen, vec!["a", "b"]);
    }
}
