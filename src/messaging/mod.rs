//! Queue messaging subsystem.
//!
//! # Data Flow
//! ```text
//! BrokerHandle::publish (any thread)
//!     → broker.rs (consumer thread per broker)
//!     → listener.rs (queue → registered contexts, fan-out)
//!     → handler.rs (MessageHandler::consume, first match per registration)
//! ```

pub mod broker;
pub mod handler;
pub mod listener;
pub mod message;

pub use broker::{BrokerEvent, BrokerHandle, BrokerSocket};
pub use handler::MessageHandler;
pub use listener::{BasicListener, Delivery};
pub use message::{Message, MessageContext};
