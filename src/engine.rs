//! Engine: frozen context tree plus installed applications.
//!
//! # Data Flow
//! ```text
//! EngineBuilder (installer drives the tree builder and applications)
//!     → initialize() → ContextTree (global first, then applications by name)
//!     → Applications::install → per-application listener tables
//!     → Engine (immutable, shared as Arc by every socket)
//!
//! HTTP:    respond_http(apps, request) → each app's HttpListener in order → response or error page
//! Queues:  deliver(apps, message)      → each app's BasicListener → fan-out
//! ```

use std::collections::BTreeMap;
use std::time::Instant;

use axum::http::StatusCode;
use tracing::debug;

use crate::application::registry::{ApplicationRuntime, Applications};
use crate::context::builder::ContextTreeBuilder;
use crate::context::entry::{Entry, ProcedureEntry};
use crate::context::node::ContextId;
use crate::context::tree::ContextTree;
use crate::error::{EngineError, EngineResult};
use crate::http::request::HttpRequest;
use crate::http::response::{apply_error_document, render_error, Response};
use crate::lifecycle::procedures::EntryKey;
use crate::messaging::listener::Delivery;
use crate::messaging::message::Message;
use crate::observability::metrics;
use crate::routing::router::HttpDispatch;

/// Mutable install phase of an [`Engine`].
pub struct EngineBuilder {
    tree: ContextTreeBuilder,
    applications: Applications,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            tree: ContextTreeBuilder::new(),
            applications: Applications::new(),
        }
    }

    /// The engine-global context.
    pub fn global(&self) -> ContextId {
        self.tree.root()
    }

    pub fn tree(&mut self) -> &mut ContextTreeBuilder {
        &mut self.tree
    }

    pub fn applications(&self) -> &Applications {
        &self.applications
    }

    pub fn add_application(&mut self, name: &str, library: Option<&str>) -> EngineResult<ContextId> {
        let application = self.applications.add_application(&mut self.tree, name, library)?;
        Ok(application.context())
    }

    pub fn add_http_listener(&mut self, application: &str) -> EngineResult<ContextId> {
        let tree = &mut self.tree;
        self.applications
            .get_mut(application)
            .ok_or_else(|| EngineError::UnresolvedReference {
                id: application.to_string(),
            })?
            .add_http_listener(tree)
    }

    pub fn add_basic_listener(&mut self, application: &str) -> EngineResult<ContextId> {
        let tree = &mut self.tree;
        self.applications
            .get_mut(application)
            .ok_or_else(|| EngineError::UnresolvedReference {
                id: application.to_string(),
            })?
            .add_basic_listener(tree)
    }

    /// Freeze the tree and build every listener table.
    pub fn initialize(self) -> EngineResult<Engine> {
        let order = self.applications.initialization_order(self.tree.root());
        let tree = self.tree.initialize_with_order(&order)?;
        let applications = self.applications.install(&tree)?;
        debug!(contexts = tree.len(), applications = applications.len(), "Engine initialized");
        Ok(Engine { tree, applications })
    }
}

/// The immutable routing engine.
pub struct Engine {
    tree: ContextTree,
    applications: BTreeMap<String, ApplicationRuntime>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn tree(&self) -> &ContextTree {
        &self.tree
    }

    pub fn application(&self, name: &str) -> Option<&ApplicationRuntime> {
        self.applications.get(name)
    }

    pub fn applications(&self) -> impl Iterator<Item = &ApplicationRuntime> {
        self.applications.values()
    }

    fn selected<'a>(&'a self, names: &'a [String]) -> impl Iterator<Item = &'a ApplicationRuntime> + 'a {
        names.iter().filter_map(move |name| self.applications.get(name))
    }

    /// Try the HTTP listener of each named application in order.
    pub fn dispatch_http(&self, applications: &[String], request: &HttpRequest) -> HttpDispatch {
        let mut unanswered = None;
        for listener in self.selected(applications).filter_map(ApplicationRuntime::http_listener) {
            let dispatch = listener.create_request_handler(&self.tree, request);
            if dispatch.response.is_some() {
                return dispatch;
            }
            unanswered.get_or_insert(dispatch.context);
        }
        HttpDispatch {
            response: None,
            context: unanswered.unwrap_or_else(|| self.tree.root()),
        }
    }

    /// Dispatch and turn "no handler" into a rendered 404.
    pub fn respond_http(&self, applications: &[String], request: &HttpRequest) -> Response {
        let started = Instant::now();
        let dispatch = self.dispatch_http(applications, request);
        let response = match dispatch.response {
            Some(response) => apply_error_document(&self.tree, dispatch.context, response),
            None => {
                debug!(
                    request_id = %request.id(),
                    path = %request.path(),
                    context = %dispatch.context,
                    "No handler produced a response"
                );
                render_error(&self.tree, dispatch.context, StatusCode::NOT_FOUND, request.id())
            }
        };
        metrics::record_request(request.method().as_str(), response.status().as_u16(), started);
        response
    }

    /// Deliver a message to the basic listener of each named application.
    pub fn deliver(&self, applications: &[String], message: &Message) -> Delivery {
        self.selected(applications)
            .filter_map(ApplicationRuntime::basic_listener)
            .fold(Delivery::default(), |total, listener| {
                total.merge(listener.deliver(&self.tree, message))
            })
    }

    /// Every procedure entry in the tree, in arena order.
    pub fn procedures(&self) -> Vec<(EntryKey, ProcedureEntry)> {
        let mut procedures = Vec::new();
        for index in 0..self.tree.len() {
            let context = ContextId(index);
            for (position, entry) in self.tree.entries(context).iter().enumerate() {
                if let Entry::Procedure(procedure) = entry {
                    procedures.push((
                        EntryKey {
                            context,
                            index: position,
                        },
                        procedure.clone(),
                    ));
                }
            }
        }
        procedures
    }

    pub fn dump_tree(&self) -> String {
        self.tree.dump_tree(self.tree.root(), 0)
    }
}
