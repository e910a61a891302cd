//! Applications registry.
//!
//! # Responsibilities
//! - Create one application context per loaded application, under the global context
//! - Own at most one basic and one HTTP listener context per application
//! - Fix the initialization order across applications (by name)
//!
//! # Design Decisions
//! - Duplicate application names are a startup error
//! - Listener contexts see engine-global objects through the hidden fallback
//! - Listener routing tables are built after the tree is frozen

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::context::builder::ContextTreeBuilder;
use crate::context::node::{ContextId, ContextKind};
use crate::context::tree::ContextTree;
use crate::error::{EngineError, EngineResult};
use crate::messaging::listener::BasicListener;
use crate::routing::router::HttpListener;

/// An application while the tree is being built.
#[derive(Debug, Clone)]
pub struct Application {
    name: String,
    library: Option<String>,
    context: ContextId,
    basic_listener: Option<ContextId>,
    http_listener: Option<ContextId>,
}

impl Application {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the library the application was loaded from, if any.
    pub fn library(&self) -> Option<&str> {
        self.library.as_deref()
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn basic_listener(&self) -> Option<ContextId> {
        self.basic_listener
    }

    pub fn http_listener(&self) -> Option<ContextId> {
        self.http_listener
    }

    pub fn add_basic_listener(&mut self, tree: &mut ContextTreeBuilder) -> EngineResult<ContextId> {
        if self.basic_listener.is_some() {
            return Err(EngineError::DuplicateListener {
                application: self.name.clone(),
                kind: "basic",
            });
        }
        let listener = add_listener(tree, self.context, ContextKind::BasicListener);
        self.basic_listener = Some(listener);
        Ok(listener)
    }

    pub fn add_http_listener(&mut self, tree: &mut ContextTreeBuilder) -> EngineResult<ContextId> {
        if self.http_listener.is_some() {
            return Err(EngineError::DuplicateListener {
                application: self.name.clone(),
                kind: "http",
            });
        }
        let listener = add_listener(tree, self.context, ContextKind::HttpListener);
        self.http_listener = Some(listener);
        Ok(listener)
    }
}

fn add_listener(tree: &mut ContextTreeBuilder, application: ContextId, kind: ContextKind) -> ContextId {
    let root = tree.root();
    let listener = tree.add_node(Some(application), kind);
    tree.set_hidden(listener, root);
    listener
}

/// Every application of the engine, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct Applications {
    applications: BTreeMap<String, Application>,
}

impl Applications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an application context parented to the global context.
    pub fn add_application(
        &mut self,
        tree: &mut ContextTreeBuilder,
        name: &str,
        library: Option<&str>,
    ) -> EngineResult<&mut Application> {
        if self.applications.contains_key(name) {
            return Err(EngineError::DuplicateApplication(name.to_string()));
        }
        let root = tree.root();
        let context = tree.add_node(Some(root), ContextKind::Application(name.to_string()));
        debug!(application = %name, context = %context, "Application added");

        let application = self.applications.entry(name.to_string()).or_insert(Application {
            name: name.to_string(),
            library: library.map(str::to_string),
            context,
            basic_listener: None,
            http_listener: None,
        });
        Ok(application)
    }

    pub fn get(&self, name: &str) -> Option<&Application> {
        self.applications.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Application> {
        self.applications.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    /// Applications in initialization order (lexicographic by name).
    pub fn iter(&self) -> impl Iterator<Item = &Application> {
        self.applications.values()
    }

    /// Initialization roots: the global context, then every application.
    pub fn initialization_order(&self, global: ContextId) -> Vec<ContextId> {
        std::iter::once(global)
            .chain(self.applications.values().map(Application::context))
            .collect()
    }

    /// Build the listener routing tables against the frozen tree.
    pub fn install(self, tree: &ContextTree) -> EngineResult<BTreeMap<String, ApplicationRuntime>> {
        let mut installed = BTreeMap::new();
        for (name, application) in self.applications {
            let http = application
                .http_listener
                .map(|root| HttpListener::build(tree, root))
                .transpose()?;
            let basic = application
                .basic_listener
                .map(|root| BasicListener::build(tree, root))
                .transpose()?;
            info!(
                application = %name,
                http_listener = http.is_some(),
                basic_listener = basic.is_some(),
                "Application installed"
            );
            installed.insert(
                name,
                ApplicationRuntime {
                    application,
                    http,
                    basic,
                },
            );
        }
        Ok(installed)
    }
}

/// An application with its listener routing tables, after initialization.
#[derive(Debug, Clone)]
pub struct ApplicationRuntime {
    application: Application,
    http: Option<HttpListener>,
    basic: Option<BasicListener>,
}

impl ApplicationRuntime {
    pub fn name(&self) -> &str {
        self.application.name()
    }

    pub fn library(&self) -> Option<&str> {
        self.application.library()
    }

    pub fn context(&self) -> ContextId {
        self.application.context()
    }

    pub fn http_listener(&self) -> Option<&HttpListener> {
        self.http.as_ref()
    }

    pub fn basic_listener(&self) -> Option<&BasicListener> {
        self.basic.as_ref()
    }
}
