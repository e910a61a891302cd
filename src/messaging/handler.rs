//! Message handler capability.

use crate::error::HandlerError;
use crate::messaging::message::MessageContext;

/// Consumes queue messages.
///
/// Returning `Ok(true)` marks the message as consumed for the registration
/// being scanned; `Ok(false)` lets the next entry of that registration try.
pub trait MessageHandler: Send + Sync {
    fn consume(&self, message: &MessageContext<'_>) -> Result<bool, HandlerError>;
}
