//! Plain value objects.

use crate::context::object::Object;
use crate::error::PluginError;
use crate::plugin::registry::Settings;

/// A string registered under an id, for other components to reference.
///
/// Settings: `value` (required).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueObject {
    value: String,
}

impl ValueObject {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, PluginError> {
        Ok(Self::new(settings.require("value")?))
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl Object for ValueObject {}
