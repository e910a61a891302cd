//! Mutable build phase of the context tree.
//!
//! The installer drives this API once at startup. Nothing can be added after
//! [`ContextTreeBuilder::initialize`] consumed the builder.

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::context::entry::{Component, PendingEntry};
use crate::context::node::{ContextId, ContextKind, ErrorDocument, NodeScope, ResponseSettings};
use crate::context::object::Object;
use crate::context::tree::{ContextNode, ContextTree};
use crate::error::{EngineError, EngineResult};
use crate::http::handler::RequestHandler;
use crate::lifecycle::procedures::Procedure;
use crate::messaging::handler::MessageHandler;
use crate::routing::matcher::{EndpointPath, HostPattern};

/// Id reported for inline components that fail a capability cast.
const INLINE_COMPONENT: &str = "<inline>";

struct PendingNode {
    kind: ContextKind,
    scope: NodeScope,
    children: Vec<ContextId>,
    entries: Vec<PendingEntry>,
    components: Vec<Arc<dyn Object>>,
    response: ResponseSettings,
}

/// Builder for a [`ContextTree`]. Node 0 is always the global context.
pub struct ContextTreeBuilder {
    nodes: Vec<PendingNode>,
}

impl Default for ContextTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextTreeBuilder {
    pub fn new() -> Self {
        let mut builder = Self { nodes: Vec::new() };
        builder.add_node(None, ContextKind::Global);
        builder
    }

    pub fn root(&self) -> ContextId {
        ContextId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn kind(&self, context: ContextId) -> &ContextKind {
        &self.nodes[context.0].kind
    }

    pub fn parent(&self, context: ContextId) -> Option<ContextId> {
        self.nodes[context.0].scope.parent
    }

    /// Create a node without adding it to the parent's entry list.
    pub(crate) fn add_node(&mut self, parent: Option<ContextId>, kind: ContextKind) -> ContextId {
        let id = ContextId(self.nodes.len());
        self.nodes.push(PendingNode {
            kind,
            scope: NodeScope::new(parent),
            children: Vec::new(),
            entries: Vec::new(),
            components: Vec::new(),
            response: ResponseSettings::default(),
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        id
    }

    fn push_entry(&mut self, context: ContextId, entry: PendingEntry) {
        self.nodes[context.0].entries.push(entry);
    }

    /// Register an object under `id`. Replaces (and returns) an object already
    /// registered under the same id in this context.
    pub fn add_object(
        &mut self,
        context: ContextId,
        id: impl Into<String>,
        object: Arc<dyn Object>,
    ) -> Option<Arc<dyn Object>> {
        self.nodes[context.0].scope.objects.add_object(id, object)
    }

    /// Add a nested context.
    ///
    /// Without an id the context is an anonymous entry of `parent`. With an id
    /// it is only registered by name and takes part in routing wherever a
    /// [`add_ref_context`](Self::add_ref_context) points at it.
    pub fn add_context(&mut self, parent: ContextId, id: Option<&str>, inherit_objects: bool) -> ContextId {
        let child = self.add_node(Some(parent), ContextKind::Context);
        self.nodes[child.0].scope.inherit_objects = inherit_objects;
        match id {
            Some(id) => {
                let named = &mut self.nodes[parent.0].scope.named_contexts;
                if let Some(previous) = named.insert(id.to_string(), child) {
                    warn!(context_id = %id, previous = %previous, "Named context replaced");
                }
            }
            None => self.push_entry(parent, PendingEntry::Context(child)),
        }
        child
    }

    /// Reference a named context declared elsewhere; resolved at initialization.
    pub fn add_ref_context(&mut self, parent: ContextId, ref_id: impl Into<String>) {
        self.push_entry(parent, PendingEntry::RefContext(ref_id.into()));
    }

    /// Add an endpoint. Its path is relative to the nearest enclosing endpoint.
    pub fn add_endpoint(&mut self, parent: ContextId, path: &str) -> ContextId {
        let child = self.add_node(Some(parent), ContextKind::Endpoint(EndpointPath::new(path)));
        self.push_entry(parent, PendingEntry::Endpoint(child));
        child
    }

    pub fn add_host(&mut self, parent: ContextId, server_name: &str) -> ContextId {
        let child = self.add_node(Some(parent), ContextKind::Host(HostPattern::new(server_name)));
        self.push_entry(parent, PendingEntry::Host(child));
        child
    }

    pub fn add_queue(&mut self, parent: ContextId, queue: impl Into<String>) -> ContextId {
        let child = self.add_node(Some(parent), ContextKind::Queue(queue.into()));
        self.push_entry(parent, PendingEntry::Queue(child));
        child
    }

    pub fn add_request_handler(&mut self, context: ContextId, handler: Component<dyn RequestHandler>) {
        self.push_entry(context, PendingEntry::RequestHandler(handler));
    }

    pub fn add_message_handler(&mut self, context: ContextId, handler: Component<dyn MessageHandler>) {
        self.push_entry(context, PendingEntry::MessageHandler(handler));
    }

    pub fn add_procedure(&mut self, context: ContextId, procedure: Component<dyn Procedure>, threads: usize) {
        self.push_entry(
            context,
            PendingEntry::Procedure {
                procedure,
                threads: threads.max(1),
            },
        );
    }

    /// Add an inline plugin-created object as a request handler entry.
    ///
    /// The object's initialization hook runs with the rest of the tree.
    pub fn add_request_handler_object(&mut self, context: ContextId, object: Arc<dyn Object>) -> EngineResult<()> {
        let handler = object
            .clone()
            .as_request_handler()
            .ok_or_else(|| wrong_kind("request handler"))?;
        self.nodes[context.0].components.push(object);
        self.add_request_handler(context, Component::Owned(handler));
        Ok(())
    }

    pub fn add_message_handler_object(&mut self, context: ContextId, object: Arc<dyn Object>) -> EngineResult<()> {
        let handler = object
            .clone()
            .as_message_handler()
            .ok_or_else(|| wrong_kind("message handler"))?;
        self.nodes[context.0].components.push(object);
        self.add_message_handler(context, Component::Owned(handler));
        Ok(())
    }

    pub fn add_procedure_object(
        &mut self,
        context: ContextId,
        object: Arc<dyn Object>,
        threads: usize,
    ) -> EngineResult<()> {
        let procedure = object
            .clone()
            .as_procedure()
            .ok_or_else(|| wrong_kind("procedure"))?;
        self.nodes[context.0].components.push(object);
        self.add_procedure(context, Component::Owned(procedure), threads);
        Ok(())
    }

    /// Whether response headers and error documents are inherited from the parent.
    pub fn set_inherit(&mut self, context: ContextId, inherit: bool) {
        self.nodes[context.0].response.inherit = inherit;
    }

    /// Whether object lookups continue into the parent.
    pub fn set_inherit_objects(&mut self, context: ContextId, inherit_objects: bool) {
        self.nodes[context.0].scope.inherit_objects = inherit_objects;
    }

    /// Lowest-priority lookup fallback for `context`.
    pub fn set_hidden(&mut self, context: ContextId, hidden: ContextId) {
        self.nodes[context.0].scope.hidden = Some(hidden);
    }

    /// Append a response header. Repeated names keep every value.
    pub fn add_header(&mut self, context: ContextId, name: &str, value: &str) -> EngineResult<()> {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| EngineError::InvalidHeader {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| EngineError::InvalidHeader {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        self.nodes[context.0].response.headers.append(header_name, header_value);
        Ok(())
    }

    pub fn add_error_document(&mut self, context: ContextId, status: u16, document: ErrorDocument) {
        self.nodes[context.0].response.error_documents.insert(status, document);
    }

    /// Freeze the tree with the global context as the only initialization root.
    pub fn initialize(self) -> EngineResult<ContextTree> {
        let root = self.root();
        self.initialize_with_order(&[root])
    }

    /// Freeze the tree.
    ///
    /// Resolves references, rejects reference cycles, computes effective
    /// response settings and runs every initialization hook once. Subtrees
    /// rooted at `roots` are initialized in the given order; a root listed
    /// later is skipped while walking an earlier one.
    pub fn initialize_with_order(self, roots: &[ContextId]) -> EngineResult<ContextTree> {
        let mut pending = Vec::with_capacity(self.nodes.len());
        let mut nodes = Vec::with_capacity(self.nodes.len());
        for node in self.nodes {
            pending.push(node.entries);
            nodes.push(ContextNode {
                kind: node.kind,
                scope: node.scope,
                children: node.children,
                entries: Vec::new(),
                components: node.components,
                response: node.response,
                effective: ResponseSettings::default(),
            });
        }

        let mut tree = ContextTree { nodes };
        for (index, entries) in pending.into_iter().enumerate() {
            let context = ContextId(index);
            let mut resolved = Vec::with_capacity(entries.len());
            for entry in entries {
                resolved.push(tree.resolve_entry(context, entry)?);
            }
            tree.nodes[index].entries = resolved;
        }

        tree.check_reference_cycles()?;
        tree.resolve_response_settings();
        tree.run_initializers(roots)?;

        debug!(contexts = tree.len(), "Context tree initialized");
        Ok(tree)
    }
}

fn wrong_kind(expected: &'static str) -> EngineError {
    EngineError::WrongComponentKind {
        id: INLINE_COMPONENT.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::entry::Entry;
    use crate::context::object::{downcast_object, ObjectScope};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Value(&'static str);
    impl Object for Value {}

    fn value_of<'a>(tree: &'a ContextTree, context: ContextId, id: &str) -> Option<&'a str> {
        tree.find_object(context, id)
            .and_then(downcast_object::<Value>)
            .map(|v| v.0)
    }

    #[test]
    fn test_child_sees_parent_objects() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let parent = builder.add_context(root, None, true);
        let child = builder.add_context(parent, None, true);
        builder.add_object(parent, "x", Arc::new(Value("parent")));

        let tree = builder.initialize().unwrap();
        assert_eq!(value_of(&tree, child, "x"), value_of(&tree, parent, "x"));
        assert_eq!(value_of(&tree, child, "x"), Some("parent"));
        assert_eq!(value_of(&tree, root, "x"), None);
    }

    #[test]
    fn test_child_object_shadows_parent() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let parent = builder.add_context(root, None, true);
        let child = builder.add_context(parent, None, true);
        builder.add_object(parent, "x", Arc::new(Value("parent")));
        builder.add_object(child, "x", Arc::new(Value("child")));

        let tree = builder.initialize().unwrap();
        assert_eq!(value_of(&tree, child, "x"), Some("child"));
        assert_eq!(value_of(&tree, parent, "x"), Some("parent"));
    }

    #[test]
    fn test_non_inheriting_context_uses_hidden_last() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        builder.add_object(root, "global", Arc::new(Value("global")));
        let app = builder.add_context(root, None, true);
        builder.add_object(app, "app", Arc::new(Value("app")));
        let isolated = builder.add_context(app, None, false);
        builder.set_hidden(isolated, root);

        let tree = builder.initialize().unwrap();
        assert_eq!(value_of(&tree, isolated, "app"), None);
        assert_eq!(value_of(&tree, isolated, "global"), Some("global"));
    }

    #[test]
    fn test_hidden_has_lowest_priority() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        builder.add_object(root, "x", Arc::new(Value("hidden")));
        let app = builder.add_context(root, None, true);
        builder.add_object(app, "x", Arc::new(Value("parent")));
        let listener = builder.add_context(app, None, true);
        builder.set_hidden(listener, root);

        let tree = builder.initialize().unwrap();
        assert_eq!(value_of(&tree, listener, "x"), Some("parent"));
    }

    #[test]
    fn test_ref_context_resolution() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let shared = builder.add_context(root, Some("shared"), true);
        let app = builder.add_context(root, None, true);
        builder.add_ref_context(app, "shared");

        let tree = builder.initialize().unwrap();
        match tree.entries(app) {
            [Entry::RefContext(target)] => assert_eq!(*target, shared),
            other => panic!("unexpected entries: {:?}", other),
        }
        // Named contexts are not entries of their parent.
        assert!(tree
            .entries(root)
            .iter()
            .all(|entry| entry.context() != Some(shared)));
    }

    #[test]
    fn test_unresolved_reference() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        builder.add_ref_context(root, "missing");
        let err = builder.initialize().err().unwrap();
        assert!(matches!(err, EngineError::UnresolvedReference { id } if id == "missing"));
    }

    #[test]
    fn test_wrong_component_kind() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        builder.add_object(root, "plain", Arc::new(Value("v")));
        builder.add_request_handler(root, Component::Ref("plain".to_string()));
        let err = builder.initialize().err().unwrap();
        assert!(matches!(
            err,
            EngineError::WrongComponentKind { expected: "request handler", .. }
        ));
    }

    #[test]
    fn test_reference_cycle_rejected() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let loop_ctx = builder.add_context(root, Some("loop"), true);
        builder.add_ref_context(loop_ctx, "loop");
        let err = builder.initialize().err().unwrap();
        assert!(matches!(err, EngineError::ReferenceCycle { .. }));
    }

    #[test]
    fn test_invalid_header() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        assert!(builder.add_header(root, "bad header", "x").is_err());
        assert!(builder.add_header(root, "x-ok", "bad\nvalue").is_err());
        assert!(builder.add_header(root, "x-ok", "fine").is_ok());
    }

    #[test]
    fn test_effective_headers_through_tree() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let parent = builder.add_context(root, None, true);
        builder.add_header(parent, "X-Foo", "baz").unwrap();
        builder.add_header(parent, "X-Other", "1").unwrap();
        let inheriting = builder.add_endpoint(parent, "/a");
        builder.add_header(inheriting, "X-Foo", "bar").unwrap();
        let isolated = builder.add_endpoint(parent, "/b");
        builder.set_inherit(isolated, false);
        builder.add_header(isolated, "X-Foo", "bar").unwrap();

        let tree = builder.initialize().unwrap();
        let headers = tree.headers(inheriting);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["x-foo"], "bar");
        assert_eq!(headers["x-other"], "1");

        let headers = tree.headers(isolated);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-foo"], "bar");
    }

    struct Recorder {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Object for Recorder {
        fn initialize(&self, scope: &ObjectScope<'_>) -> EngineResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(self.name);
            assert!(scope.find_object(self.name).is_some());
            Ok(())
        }
    }

    #[test]
    fn test_initialize_runs_once_top_down_in_root_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let recorder = |name| {
            Arc::new(Recorder {
                name,
                calls: calls.clone(),
                order: order.clone(),
            })
        };

        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        builder.add_object(root, "global", recorder("global"));
        let beta = builder.add_context(root, None, true);
        builder.add_object(beta, "beta", recorder("beta"));
        let alpha = builder.add_context(root, None, true);
        builder.add_object(alpha, "alpha", recorder("alpha"));
        let nested = builder.add_context(alpha, None, true);
        builder.add_object(nested, "nested", recorder("nested"));

        builder.initialize_with_order(&[root, alpha, beta]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(*order.lock().unwrap(), vec!["global", "alpha", "nested", "beta"]);
    }

    #[test]
    fn test_dump_tree_depth_first() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let api = builder.add_endpoint(root, "/api");
        builder.add_endpoint(api, "/v1");
        builder.add_host(root, "*.example.com");
        builder.add_context(root, Some("shared"), true);

        let tree = builder.initialize().unwrap();
        let dump = tree.dump_tree(root, 0);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "ctx-0 global");
        assert_eq!(lines[1], "  ctx-1 endpoint /api");
        assert_eq!(lines[2], "    ctx-2 endpoint /v1");
        assert_eq!(lines[3], "  ctx-3 host *.example.com");
        assert_eq!(lines[4], "  named 'shared':");
        assert_eq!(lines[5], "    ctx-4 context");
    }
}
