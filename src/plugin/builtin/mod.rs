//! Components shipped with the server, registered under `jerry/builtin/...`.

pub mod basic;
pub mod http;
pub mod object;
pub mod procedure;

use std::sync::Arc;

use crate::context::object::Object;
use crate::plugin::registry::PluginRegistry;

pub use basic::{CollectHandler, LogHandler};
pub use http::{EchoHandler, RedirectHandler, StaticHandler};
pub use object::ValueObject;
pub use procedure::TickerProcedure;

pub const STATIC: &str = "jerry/builtin/http/static";
pub const ECHO: &str = "jerry/builtin/http/echo";
pub const REDIRECT: &str = "jerry/builtin/http/redirect";
pub const LOG: &str = "jerry/builtin/basic/log";
pub const COLLECT: &str = "jerry/builtin/basic/collect";
pub const VALUE: &str = "jerry/builtin/object/value";
pub const TICKER: &str = "jerry/builtin/procedure/ticker";

pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register(STATIC, |settings| {
        Ok(Arc::new(StaticHandler::from_settings(settings)?) as Arc<dyn Object>)
    });
    registry.register(ECHO, |settings| {
        Ok(Arc::new(EchoHandler::from_settings(settings)?) as Arc<dyn Object>)
    });
    registry.register(REDIRECT, |settings| {
        Ok(Arc::new(RedirectHandler::from_settings(settings)?) as Arc<dyn Object>)
    });
    registry.register(LOG, |settings| {
        Ok(Arc::new(LogHandler::from_settings(settings)?) as Arc<dyn Object>)
    });
    registry.register(COLLECT, |_settings| Ok(Arc::new(CollectHandler::new()) as Arc<dyn Object>));
    registry.register(VALUE, |settings| {
        Ok(Arc::new(ValueObject::from_settings(settings)?) as Arc<dyn Object>)
    });
    registry.register(TICKER, |settings| {
        Ok(Arc::new(TickerProcedure::from_settings(settings)?) as Arc<dyn Object>)
    });
}
