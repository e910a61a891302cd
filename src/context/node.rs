//! Context node identity, kinds and per-node response settings.

use std::collections::{BTreeMap, HashMap};

use axum::http::HeaderMap;
use bytes::Bytes;

use crate::context::object::ObjectContext;
use crate::routing::matcher::{EndpointPath, HostPattern};

/// Stable handle of a node in the context arena.
///
/// Handles are only meaningful for the tree (or builder) that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub(crate) usize);

impl ContextId {
    /// Arena position.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// What a node is keyed by, and therefore how listeners route to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextKind {
    /// Engine-global objects. Always node 0.
    Global,
    Application(String),
    HttpListener,
    BasicListener,
    /// Plain nested context, transparent to routing.
    Context,
    /// Path-keyed context, relative to the enclosing endpoint.
    Endpoint(EndpointPath),
    /// Virtual-host keyed context.
    Host(HostPattern),
    /// Queue-keyed context in a basic listener.
    Queue(String),
}

impl ContextKind {
    pub fn label(&self) -> &'static str {
        match self {
            ContextKind::Global => "global",
            ContextKind::Application(_) => "application",
            ContextKind::HttpListener => "http-listener",
            ContextKind::BasicListener => "basic-listener",
            ContextKind::Context => "context",
            ContextKind::Endpoint(_) => "endpoint",
            ContextKind::Host(_) => "host",
            ContextKind::Queue(_) => "queue",
        }
    }
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextKind::Application(name) => write!(f, "application '{}'", name),
            ContextKind::Endpoint(path) => write!(f, "endpoint {}", path),
            ContextKind::Host(pattern) => write!(f, "host {}", pattern),
            ContextKind::Queue(name) => write!(f, "queue '{}'", name),
            other => f.write_str(other.label()),
        }
    }
}

/// Body served in place of an error status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDocument {
    pub content_type: String,
    pub body: Bytes,
}

impl ErrorDocument {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }
}

/// Response headers and error documents declared on one node.
#[derive(Debug, Clone)]
pub struct ResponseSettings {
    /// Overlay the parent's effective settings (local entries win).
    pub inherit: bool,
    pub headers: HeaderMap,
    pub error_documents: BTreeMap<u16, ErrorDocument>,
}

impl Default for ResponseSettings {
    fn default() -> Self {
        Self {
            inherit: true,
            headers: HeaderMap::new(),
            error_documents: BTreeMap::new(),
        }
    }
}

impl ResponseSettings {
    /// Effective settings of a node given its parent's effective settings.
    pub fn resolve(&self, parent: Option<&ResponseSettings>) -> ResponseSettings {
        let mut effective = match parent {
            Some(parent) if self.inherit => parent.clone(),
            _ => ResponseSettings::default(),
        };
        effective.inherit = self.inherit;

        for name in self.headers.keys() {
            effective.headers.remove(name);
        }
        for (name, value) in self.headers.iter() {
            effective.headers.append(name.clone(), value.clone());
        }
        effective.error_documents.extend(
            self.error_documents
                .iter()
                .map(|(status, doc)| (*status, doc.clone())),
        );
        effective
    }
}

/// Lookup-related state of a node: its objects and how lookups leave it.
#[derive(Debug, Clone)]
pub struct NodeScope {
    pub parent: Option<ContextId>,
    /// Continue to the parent when a local lookup misses.
    pub inherit_objects: bool,
    /// Lowest-priority fallback, consulted after the parent chain is exhausted.
    pub hidden: Option<ContextId>,
    pub objects: ObjectContext,
    /// Contexts registered by id (not part of the entry list).
    pub named_contexts: HashMap<String, ContextId>,
}

impl NodeScope {
    pub fn new(parent: Option<ContextId>) -> Self {
        Self {
            parent,
            inherit_objects: true,
            hidden: None,
            objects: ObjectContext::new(),
            named_contexts: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn settings(inherit: bool, headers: &[(&'static str, &'static str)]) -> ResponseSettings {
        let mut s = ResponseSettings {
            inherit,
            ..ResponseSettings::default()
        };
        for (name, value) in headers {
            s.headers.insert(*name, HeaderValue::from_static(*value));
        }
        s
    }

    #[test]
    fn test_header_inheritance_overlay() {
        let parent = settings(true, &[("x-foo", "baz"), ("x-other", "1")]);
        let child = settings(true, &[("x-foo", "bar")]);

        let effective = child.resolve(Some(&parent));
        assert_eq!(effective.headers.len(), 2);
        assert_eq!(effective.headers["x-foo"], "bar");
        assert_eq!(effective.headers["x-other"], "1");
    }

    #[test]
    fn test_header_inheritance_disabled() {
        let parent = settings(true, &[("x-foo", "baz"), ("x-other", "1")]);
        let child = settings(false, &[("x-foo", "bar")]);

        let effective = child.resolve(Some(&parent));
        assert_eq!(effective.headers.len(), 1);
        assert_eq!(effective.headers["x-foo"], "bar");
        assert!(effective.headers.get("x-other").is_none());
    }

    #[test]
    fn test_error_documents_overlay() {
        let mut parent = ResponseSettings::default();
        parent.error_documents.insert(404, ErrorDocument::new("text/html", "parent 404"));
        parent.error_documents.insert(500, ErrorDocument::new("text/html", "parent 500"));

        let mut child = ResponseSettings::default();
        child.error_documents.insert(404, ErrorDocument::new("text/plain", "child 404"));

        let effective = child.resolve(Some(&parent));
        assert_eq!(effective.error_documents[&404].body, "child 404");
        assert_eq!(effective.error_documents[&500].body, "parent 500");
    }

    #[test]
    fn test_context_id_display() {
        assert_eq!(ContextId(7).to_string(), "ctx-7");
    }
}
