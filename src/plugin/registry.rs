//! Plugin registry: component factories by implementation name.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::context::object::Object;
use crate::error::{EngineError, EngineResult, PluginError};

/// Flat `(key, value)` settings handed to a factory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings(Vec<(String, String)>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str, PluginError> {
        self.get(key).ok_or_else(|| PluginError::MissingSetting(key.to_string()))
    }

    /// Parse an optional setting.
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, PluginError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value.trim().parse().map(Some).map_err(|_| PluginError::InvalidSetting {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Builds one component from its settings.
pub type PluginFactory = Arc<dyn Fn(&Settings) -> Result<Arc<dyn Object>, PluginError> + Send + Sync>;

/// Factories keyed by implementation name.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in plugin.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::plugin::builtin::register_builtins(&mut registry);
        registry
    }

    /// Register a factory. A later registration of the same name replaces the earlier one.
    pub fn register<F>(&mut self, implementation: impl Into<String>, factory: F)
    where
        F: Fn(&Settings) -> Result<Arc<dyn Object>, PluginError> + Send + Sync + 'static,
    {
        let implementation = implementation.into();
        if self.factories.insert(implementation.clone(), Arc::new(factory)).is_some() {
            tracing::warn!(implementation = %implementation, "Plugin factory replaced");
        }
    }

    pub fn contains(&self, implementation: &str) -> bool {
        self.factories.contains_key(implementation)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn create(&self, implementation: &str, settings: &Settings) -> EngineResult<Arc<dyn Object>> {
        let factory = self
            .factories
            .get(implementation)
            .ok_or_else(|| EngineError::UnknownImplementation(implementation.to_string()))?;
        factory(settings).map_err(|source| EngineError::Plugin {
            implementation: implementation.to_string(),
            source,
        })
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("implementations", &self.names())
            .finish()
    }
}
