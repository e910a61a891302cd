//! Endpoint lookup trie.
//!
//! Built once per listener scope by registering every endpoint found in the
//! context tree. Lookup descends one path segment per level, so dispatch is
//! O(depth) instead of a scan over all entries.

use std::collections::HashMap;

use crate::context::node::ContextId;
use crate::routing::matcher::path_segments;

/// One trie node, keyed by path segment.
#[derive(Debug, Default, Clone)]
pub struct EndpointEntry {
    endpoint: Option<ContextId>,
    children: HashMap<String, EndpointEntry>,
}

impl EndpointEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint context at `segments`.
    ///
    /// Returns the context already registered at that path, if any; the
    /// existing registration is kept.
    pub fn register(&mut self, segments: &[String], endpoint: ContextId) -> Result<(), ContextId> {
        let mut node = self;
        for segment in segments {
            node = node.children.entry(segment.clone()).or_default();
        }
        match node.endpoint {
            Some(existing) => Err(existing),
            None => {
                node.endpoint = Some(endpoint);
                Ok(())
            }
        }
    }

    /// All endpoints whose path is a whole-segment prefix of `path`, deepest first.
    pub fn lookup(&self, path: &str) -> Vec<ContextId> {
        let mut matches = Vec::new();
        let mut node = self;
        if let Some(endpoint) = node.endpoint {
            matches.push(endpoint);
        }
        for segment in path_segments(path) {
            match node.children.get(segment) {
                Some(child) => node = child,
                None => break,
            }
            if let Some(endpoint) = node.endpoint {
                matches.push(endpoint);
            }
        }
        matches.reverse();
        matches
    }

    /// Deepest matching endpoint.
    pub fn find(&self, path: &str) -> Option<ContextId> {
        self.lookup(path).into_iter().next()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoint.is_none() && self.children.is_empty()
    }
}
