//! Frozen context tree.
//!
//! # Responsibilities
//! - Own every context node in an arena addressed by [`ContextId`]
//! - Resolve object and named-context lookups along the parent chain
//! - Serve effective (inherited) response headers and error documents
//! - Dump the tree depth-first for diagnostics
//!
//! # Design Decisions
//! - Produced only by [`ContextTreeBuilder::initialize`](crate::context::ContextTreeBuilder::initialize):
//!   references are resolved and initialization hooks have run exactly once
//! - Immutable afterwards, so request threads share it without locks
//! - Effective settings are precomputed top-down at freeze time

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use axum::http::HeaderMap;

use crate::context::entry::{Entry, PendingEntry};
use crate::context::entry::{Component, ProcedureEntry};
use crate::context::node::{ContextId, ContextKind, ErrorDocument, NodeScope, ResponseSettings};
use crate::context::object::{downcast_object, Object, ObjectScope};
use crate::error::{EngineError, EngineResult};

/// One frozen node.
pub struct ContextNode {
    pub(crate) kind: ContextKind,
    pub(crate) scope: NodeScope,
    pub(crate) children: Vec<ContextId>,
    pub(crate) entries: Vec<Entry>,
    /// Inline components whose initialization hook still has to run.
    pub(crate) components: Vec<Arc<dyn Object>>,
    pub(crate) response: ResponseSettings,
    pub(crate) effective: ResponseSettings,
}

impl ContextNode {
    pub fn kind(&self) -> &ContextKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<ContextId> {
        self.scope.parent
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn children(&self) -> &[ContextId] {
        &self.children
    }

    pub fn scope(&self) -> &NodeScope {
        &self.scope
    }

    /// Settings declared on this node only.
    pub fn local_response(&self) -> &ResponseSettings {
        &self.response
    }
}

/// Immutable context arena.
pub struct ContextTree {
    pub(crate) nodes: Vec<ContextNode>,
}

impl ContextTree {
    /// The engine-global context.
    pub fn root(&self) -> ContextId {
        ContextId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ContextId) -> &ContextNode {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: ContextId) -> &ContextKind {
        &self.nodes[id.0].kind
    }

    pub fn parent(&self, id: ContextId) -> Option<ContextId> {
        self.nodes[id.0].scope.parent
    }

    pub fn entries(&self, id: ContextId) -> &[Entry] {
        &self.nodes[id.0].entries
    }

    /// Walk the lookup chain of `start`: local, then parents while objects are
    /// inherited, then the first hidden fallback met on the way.
    fn find_in_scopes<'a, T>(
        &'a self,
        start: ContextId,
        get: impl Fn(&'a NodeScope) -> Option<T>,
    ) -> Option<T> {
        let mut origin = Some(start);
        let mut hops = 0;
        while let Some(first) = origin.take() {
            let mut hidden = None;
            let mut current = Some(first);
            while let Some(id) = current {
                let scope = &self.nodes[id.0].scope;
                if let Some(found) = get(scope) {
                    return Some(found);
                }
                if hidden.is_none() {
                    hidden = scope.hidden;
                }
                if !scope.inherit_objects {
                    break;
                }
                current = scope.parent;
            }
            hops += 1;
            if hops > self.nodes.len() {
                break;
            }
            origin = hidden;
        }
        None
    }

    /// Find an object visible from `context`.
    pub fn find_object(&self, context: ContextId, id: &str) -> Option<&Arc<dyn Object>> {
        self.find_in_scopes(context, |scope| scope.objects.get(id))
    }

    /// Find an object visible from `context` and downcast it.
    pub fn find_object_as<T: Object>(&self, context: ContextId, id: &str) -> Option<&T> {
        self.find_object(context, id).and_then(downcast_object::<T>)
    }

    /// Find a named context visible from `context`.
    pub fn find_context(&self, context: ContextId, id: &str) -> Option<ContextId> {
        self.find_in_scopes(context, |scope| scope.named_contexts.get(id).copied())
    }

    /// Effective response headers (inherited and overlaid).
    pub fn headers(&self, context: ContextId) -> &HeaderMap {
        &self.nodes[context.0].effective.headers
    }

    /// Effective error document for a status code.
    pub fn error_document(&self, context: ContextId, status: u16) -> Option<&ErrorDocument> {
        self.nodes[context.0].effective.error_documents.get(&status)
    }

    pub fn response_settings(&self, context: ContextId) -> &ResponseSettings {
        &self.nodes[context.0].effective
    }

    /// True if `ancestor` is `node` or one of its parents.
    pub fn is_ancestor(&self, ancestor: ContextId, node: ContextId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Depth-first dump of `context` and everything it owns, in entry order.
    pub fn dump_tree(&self, context: ContextId, depth: usize) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, context, depth);
        out
    }

    fn write_tree(&self, out: &mut String, id: ContextId, depth: usize) {
        let node = &self.nodes[id.0];
        let indent = "  ".repeat(depth);

        let _ = write!(out, "{}{} {}", indent, id, node.kind);
        if !node.scope.objects.is_empty() {
            let _ = write!(out, " objects=[{}]", node.scope.objects.ids().join(", "));
        }
        if !node.scope.inherit_objects {
            out.push_str(" inherit-objects=false");
        }
        if !node.response.inherit {
            out.push_str(" inherit=false");
        }
        out.push('\n');

        for entry in &node.entries {
            match entry {
                Entry::Context(child) | Entry::Endpoint(child) | Entry::Host(child) | Entry::Queue(child) => {
                    self.write_tree(out, *child, depth + 1);
                }
                Entry::RefContext(target) => {
                    let _ = writeln!(out, "{}  -> {} {}", indent, target, self.kind(*target));
                }
                Entry::Procedure(procedure) => {
                    let _ = writeln!(out, "{}  procedure threads={}", indent, procedure.threads);
                }
                other => {
                    let _ = writeln!(out, "{}  {}", indent, other.label());
                }
            }
        }

        let mut named: Vec<(&String, &ContextId)> = node.scope.named_contexts.iter().collect();
        named.sort();
        for (name, child) in named {
            let _ = writeln!(out, "{}  named '{}':", indent, name);
            self.write_tree(out, *child, depth + 2);
        }

        for child in &node.children {
            if matches!(
                self.kind(*child),
                ContextKind::Application(_) | ContextKind::HttpListener | ContextKind::BasicListener
            ) {
                self.write_tree(out, *child, depth + 1);
            }
        }
    }

    pub(crate) fn resolve_entry(&self, context: ContextId, entry: PendingEntry) -> EngineResult<Entry> {
        Ok(match entry {
            PendingEntry::Context(child) => Entry::Context(child),
            PendingEntry::Endpoint(child) => Entry::Endpoint(child),
            PendingEntry::Host(child) => Entry::Host(child),
            PendingEntry::Queue(child) => Entry::Queue(child),
            PendingEntry::RefContext(id) => {
                let target = self
                    .find_context(context, &id)
                    .ok_or(EngineError::UnresolvedReference { id })?;
                Entry::RefContext(target)
            }
            PendingEntry::RequestHandler(Component::Owned(handler)) => Entry::RequestHandler(handler),
            PendingEntry::RequestHandler(Component::Ref(id)) => {
                let handler = self
                    .referenced_object(context, &id)?
                    .as_request_handler()
                    .ok_or(EngineError::WrongComponentKind {
                        id,
                        expected: "request handler",
                    })?;
                Entry::RequestHandler(handler)
            }
            PendingEntry::MessageHandler(Component::Owned(handler)) => Entry::MessageHandler(handler),
            PendingEntry::MessageHandler(Component::Ref(id)) => {
                let handler = self
                    .referenced_object(context, &id)?
                    .as_message_handler()
                    .ok_or(EngineError::WrongComponentKind {
                        id,
                        expected: "message handler",
                    })?;
                Entry::MessageHandler(handler)
            }
            PendingEntry::Procedure { procedure, threads } => {
                let procedure = match procedure {
                    Component::Owned(procedure) => procedure,
                    Component::Ref(id) => self
                        .referenced_object(context, &id)?
                        .as_procedure()
                        .ok_or(EngineError::WrongComponentKind {
                            id,
                            expected: "procedure",
                        })?,
                };
                Entry::Procedure(ProcedureEntry { procedure, threads })
            }
        })
    }

    fn referenced_object(&self, context: ContextId, id: &str) -> EngineResult<Arc<dyn Object>> {
        self.find_object(context, id)
            .cloned()
            .ok_or_else(|| EngineError::UnresolvedReference { id: id.to_string() })
    }

    /// Reject context references that lead back into themselves.
    pub(crate) fn check_reference_cycles(&self) -> EngineResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(tree: &ContextTree, id: ContextId, marks: &mut [Mark]) -> EngineResult<()> {
            marks[id.0] = Mark::Active;
            for entry in tree.entries(id) {
                let Some(next) = entry.context() else { continue };
                match marks[next.0] {
                    Mark::Active => {
                        return Err(EngineError::ReferenceCycle {
                            id: format!("{} ({})", next, tree.kind(next)),
                        })
                    }
                    Mark::New => visit(tree, next, marks)?,
                    Mark::Done => {}
                }
            }
            marks[id.0] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::New; self.nodes.len()];
        for index in 0..self.nodes.len() {
            if marks[index] == Mark::New {
                visit(self, ContextId(index), &mut marks)?;
            }
        }
        Ok(())
    }

    /// Precompute effective response settings. Parents always precede children.
    pub(crate) fn resolve_response_settings(&mut self) {
        for index in 0..self.nodes.len() {
            let parent = self.nodes[index].scope.parent.map(|parent| {
                debug_assert!(parent.0 < index, "parent must be created before child");
                self.nodes[parent.0].effective.clone()
            });
            let effective = self.nodes[index].response.resolve(parent.as_ref());
            self.nodes[index].effective = effective;
        }
    }

    /// Run every object's initialization hook once, subtree by subtree in `roots` order.
    pub(crate) fn run_initializers(&self, roots: &[ContextId]) -> EngineResult<()> {
        let root_set: HashSet<ContextId> = roots.iter().copied().collect();
        let mut visited = vec![false; self.nodes.len()];

        let starts = roots
            .iter()
            .copied()
            .chain((0..self.nodes.len()).map(ContextId));
        for start in starts {
            if visited[start.0] {
                continue;
            }
            let mut stack = vec![start];
            while let Some(id) = stack.pop() {
                if visited[id.0] {
                    continue;
                }
                visited[id.0] = true;
                self.initialize_node(id)?;
                for child in self.nodes[id.0].children.iter().rev() {
                    if !root_set.contains(child) {
                        stack.push(*child);
                    }
                }
            }
        }
        Ok(())
    }

    fn initialize_node(&self, id: ContextId) -> EngineResult<()> {
        let node = &self.nodes[id.0];
        let scope = ObjectScope::new(self, id);
        for object_id in node.scope.objects.ids() {
            if let Some(object) = node.scope.objects.get(object_id) {
                object.initialize(&scope)?;
            }
        }
        for component in &node.components {
            component.initialize(&scope)?;
        }
        tracing::trace!(context = %id, kind = %node.kind, "Context initialized");
        Ok(())
    }
}
