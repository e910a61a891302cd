//! HTTP listener: route lookup and dispatch.
//!
//! # Responsibilities
//! - Flatten every endpoint of a listener into per-host lookup tries
//! - Select the host scope, then the deepest matching endpoint chain
//! - Scan entries first-match and contain handler failures
//!
//! # Design Decisions
//! - Built once from the frozen tree, immutable afterwards (no locks)
//! - Hosts are tried in declaration order; first match wins
//! - Explicit "no handler" result: error rendering belongs to the caller

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::context::entry::Entry;
use crate::context::node::{ContextId, ContextKind};
use crate::context::tree::ContextTree;
use crate::error::{EngineError, EngineResult};
use crate::http::handler::RequestHandler;
use crate::http::request::{HttpRequest, RequestContext};
use crate::http::response::{Connection, Response};
use crate::observability::metrics;
use crate::routing::matcher::{strip_port, EndpointPath, HostPattern};
use crate::routing::trie::EndpointEntry;

/// One virtual host of a listener.
#[derive(Debug, Clone)]
pub struct HostRoute {
    pub pattern: HostPattern,
    pub context: ContextId,
    endpoints: EndpointEntry,
}

/// Contexts selected for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Host context, or the listener root when no host matched.
    pub scope: ContextId,
    /// Matching endpoints, deepest first.
    pub endpoints: Vec<ContextId>,
}

impl RouteMatch {
    /// The most specific context of the match.
    pub fn deepest(&self) -> ContextId {
        self.endpoints.first().copied().unwrap_or(self.scope)
    }

    /// Dispatch order: endpoints deepest first, then the scope itself.
    pub fn chain(&self) -> impl Iterator<Item = ContextId> + '_ {
        self.endpoints.iter().copied().chain(std::iter::once(self.scope))
    }
}

/// Outcome of one dispatch.
#[derive(Debug)]
pub struct HttpDispatch {
    /// `None` when no entry produced a response.
    pub response: Option<Response>,
    /// Context that answered, or the deepest matched context otherwise.
    pub context: ContextId,
}

#[derive(Clone, Copy)]
enum Scope {
    Root,
    Host(usize),
}

/// Routing table of an HTTP listener context.
#[derive(Debug, Clone)]
pub struct HttpListener {
    root: ContextId,
    hosts: Vec<HostRoute>,
    endpoints: EndpointEntry,
}

impl HttpListener {
    /// Register every endpoint and host reachable from `root` through owned entries.
    pub fn build(tree: &ContextTree, root: ContextId) -> EngineResult<Self> {
        let mut listener = Self {
            root,
            hosts: Vec::new(),
            endpoints: EndpointEntry::new(),
        };
        listener.register(tree, root, Scope::Root, &EndpointPath::root(), false)?;
        debug!(
            listener = %root,
            hosts = listener.hosts.len(),
            "HTTP listener routing table built"
        );
        Ok(listener)
    }

    fn trie_mut(&mut self, scope: Scope) -> &mut EndpointEntry {
        match scope {
            Scope::Root => &mut self.endpoints,
            Scope::Host(index) => &mut self.hosts[index].endpoints,
        }
    }

    fn register(
        &mut self,
        tree: &ContextTree,
        context: ContextId,
        scope: Scope,
        base: &EndpointPath,
        in_endpoint: bool,
    ) -> EngineResult<()> {
        for entry in tree.entries(context) {
            match entry {
                Entry::Context(child) => self.register(tree, *child, scope, base, in_endpoint)?,
                Entry::Endpoint(child) => {
                    let ContextKind::Endpoint(path) = tree.kind(*child) else {
                        continue;
                    };
                    let full = base.join(path);
                    self.trie_mut(scope)
                        .register(full.segments(), *child)
                        .map_err(|_| EngineError::DuplicateEndpoint { path: full.to_string() })?;
                    self.register(tree, *child, scope, &full, true)?;
                }
                Entry::Host(child) => {
                    let ContextKind::Host(pattern) = tree.kind(*child) else {
                        continue;
                    };
                    if in_endpoint || matches!(scope, Scope::Host(_)) {
                        return Err(EngineError::MisplacedHost {
                            pattern: pattern.to_string(),
                            parent: tree.kind(context).to_string(),
                        });
                    }
                    self.hosts.push(HostRoute {
                        pattern: pattern.clone(),
                        context: *child,
                        endpoints: EndpointEntry::new(),
                    });
                    let index = self.hosts.len() - 1;
                    self.register(tree, *child, Scope::Host(index), &EndpointPath::root(), false)?;
                }
                Entry::Queue(_) => {
                    return Err(EngineError::WrongListenerKind {
                        entry: "queue",
                        listener: "http",
                    })
                }
                Entry::MessageHandler(_) => {
                    return Err(EngineError::WrongListenerKind {
                        entry: "message-handler",
                        listener: "http",
                    })
                }
                // Referenced contexts are scanned at dispatch time, not flattened.
                Entry::RefContext(_) | Entry::RequestHandler(_) | Entry::Procedure(_) => {}
            }
        }
        Ok(())
    }

    pub fn root(&self) -> ContextId {
        self.root
    }

    pub fn hosts(&self) -> &[HostRoute] {
        &self.hosts
    }

    /// Select host scope and endpoint chain for `(host, path)`.
    pub fn resolve(&self, host: &str, path: &str) -> RouteMatch {
        let hostname = strip_port(host);
        for route in &self.hosts {
            if route.pattern.is_match(hostname) {
                return RouteMatch {
                    scope: route.context,
                    endpoints: route.endpoints.lookup(path),
                };
            }
        }
        RouteMatch {
            scope: self.root,
            endpoints: self.endpoints.lookup(path),
        }
    }

    /// Run the handler chain for `request`.
    pub fn create_request_handler(&self, tree: &ContextTree, request: &HttpRequest) -> HttpDispatch {
        let route = self.resolve(request.host(), request.path());
        for context in route.chain() {
            if let Some(answer) = scan_entries(tree, request, context) {
                // Headers nearer the handler win; referring contexts fill in the rest.
                let mut response = Connection::new(tree.headers(answer.context), request.id()).send(answer.response);
                for referrer in answer.referrers {
                    response = Connection::new(tree.headers(referrer), request.id()).send(response);
                }
                return HttpDispatch {
                    response: Some(response),
                    context: answer.context,
                };
            }
        }
        HttpDispatch {
            response: None,
            context: route.deepest(),
        }
    }
}

/// A response and the context whose handler produced it.
struct Answer {
    response: Response,
    context: ContextId,
    /// Contexts holding the references crossed on the way, innermost first.
    referrers: Vec<ContextId>,
}

/// First-match scan of one context, descending into nested and referenced contexts.
fn scan_entries(tree: &ContextTree, request: &HttpRequest, context: ContextId) -> Option<Answer> {
    for entry in tree.entries(context) {
        match entry {
            Entry::Context(child) => {
                if let Some(answer) = scan_entries(tree, request, *child) {
                    return Some(answer);
                }
            }
            Entry::RefContext(shared) => {
                if let Some(mut answer) = scan_entries(tree, request, *shared) {
                    answer.referrers.push(context);
                    return Some(answer);
                }
            }
            Entry::RequestHandler(handler) => {
                let request_context = RequestContext::new(request, tree, context);
                if let Some(response) = invoke(handler, &request_context) {
                    return Some(Answer {
                        response,
                        context,
                        referrers: Vec::new(),
                    });
                }
            }
            _ => {}
        }
    }
    None
}

fn invoke(handler: &Arc<dyn RequestHandler>, request: &RequestContext<'_>) -> Option<Response> {
    let request_id = request.request().id();
    match panic::catch_unwind(AssertUnwindSafe(|| handler.accept(request))) {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!(request_id = %request_id, context = %request.context(), error = %e, "Request handler failed");
            metrics::record_handler_error("request");
            None
        }
        Err(_) => {
            error!(request_id = %request_id, context = %request.context(), "Request handler panicked");
            metrics::record_handler_error("request");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::builder::ContextTreeBuilder;
    use crate::context::entry::Component;
    use crate::error::HandlerError;
    use crate::http::response::build_response;
    use axum::http::{header, HeaderValue, StatusCode};

    struct Fixed(&'static str);

    impl RequestHandler for Fixed {
        fn accept(&self, _request: &RequestContext<'_>) -> Result<Option<Response>, HandlerError> {
            Ok(Some(build_response(StatusCode::OK, "text/plain", self.0)?))
        }
    }

    struct Decline;

    impl RequestHandler for Decline {
        fn accept(&self, _request: &RequestContext<'_>) -> Result<Option<Response>, HandlerError> {
            Ok(None)
        }
    }

    struct Failing;

    impl RequestHandler for Failing {
        fn accept(&self, _request: &RequestContext<'_>) -> Result<Option<Response>, HandlerError> {
            Err(HandlerError::Failed("boom".into()))
        }
    }

    struct Panicking;

    impl RequestHandler for Panicking {
        fn accept(&self, _request: &RequestContext<'_>) -> Result<Option<Response>, HandlerError> {
            panic!("handler bug");
        }
    }

    fn handler(builder: &mut ContextTreeBuilder, context: ContextId, handler: impl RequestHandler + 'static) {
        builder.add_request_handler(context, Component::Owned(Arc::new(handler)));
    }

    fn body(dispatch: &HttpDispatch) -> Option<&str> {
        dispatch
            .response
            .as_ref()
            .map(|r| std::str::from_utf8(r.body()).unwrap())
    }

    fn request(host: &str, path: &str) -> HttpRequest {
        HttpRequest::get(path).with_header(header::HOST, HeaderValue::from_str(host).unwrap())
    }

    #[test]
    fn test_longest_registered_prefix() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let a = builder.add_endpoint(root, "/a");
        let ab = builder.add_endpoint(root, "/a/b");
        let abc = builder.add_endpoint(root, "/a/b/c");
        let tree = builder.initialize().unwrap();
        let listener = HttpListener::build(&tree, root).unwrap();

        let route = listener.resolve("localhost", "/a/b/c/d");
        assert_eq!(route.deepest(), abc);
        assert_eq!(route.endpoints, vec![abc, ab, a]);

        let route = listener.resolve("localhost", "/x");
        assert!(route.endpoints.is_empty());
        assert_eq!(route.deepest(), root);
    }

    #[test]
    fn test_nested_endpoint_paths_are_relative() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let api = builder.add_endpoint(root, "/api");
        let v1 = builder.add_endpoint(api, "/v1");
        let tree = builder.initialize().unwrap();
        let listener = HttpListener::build(&tree, root).unwrap();

        assert_eq!(listener.resolve("h", "/api/v1/users").deepest(), v1);
        assert_eq!(listener.resolve("h", "/v1").deepest(), root);
    }

    #[test]
    fn test_host_declaration_order() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let wildcard = builder.add_host(root, "*.example.com");
        let exact = builder.add_host(root, "www.example.com");
        let tree = builder.initialize().unwrap();
        let listener = HttpListener::build(&tree, root).unwrap();

        // First declared host wins even when a later one is more specific.
        assert_eq!(listener.resolve("www.example.com:8080", "/").scope, wildcard);
        assert_ne!(listener.resolve("www.example.com", "/").scope, exact);
        assert_eq!(listener.resolve("example.com", "/").scope, root);
    }

    #[test]
    fn test_endpoints_scoped_per_host() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let host = builder.add_host(root, "api.example.com");
        let host_docs = builder.add_endpoint(host, "/docs");
        let root_docs = builder.add_endpoint(root, "/docs");
        let tree = builder.initialize().unwrap();
        let listener = HttpListener::build(&tree, root).unwrap();

        assert_eq!(listener.resolve("api.example.com", "/docs").deepest(), host_docs);
        assert_eq!(listener.resolve("other.org", "/docs").deepest(), root_docs);
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        builder.add_endpoint(root, "/a/b");
        let a = builder.add_endpoint(root, "/a");
        builder.add_endpoint(a, "b/");
        let tree = builder.initialize().unwrap();

        let err = HttpListener::build(&tree, root).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateEndpoint { path } if path == "/a/b"));
    }

    #[test]
    fn test_misplaced_host_and_queue() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let endpoint = builder.add_endpoint(root, "/a");
        builder.add_host(endpoint, "example.com");
        let tree = builder.initialize().unwrap();
        assert!(matches!(
            HttpListener::build(&tree, root),
            Err(EngineError::MisplacedHost { .. })
        ));

        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        builder.add_queue(root, "orders");
        let tree = builder.initialize().unwrap();
        assert!(matches!(
            HttpListener::build(&tree, root),
            Err(EngineError::WrongListenerKind { entry: "queue", .. })
        ));
    }

    #[test]
    fn test_first_match_and_fallback_chain() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        handler(&mut builder, root, Fixed("root"));
        let a = builder.add_endpoint(root, "/a");
        handler(&mut builder, a, Fixed("a"));
        let ab = builder.add_endpoint(a, "/b");
        handler(&mut builder, ab, Decline);
        handler(&mut builder, ab, Failing);
        handler(&mut builder, ab, Panicking);
        let tree = builder.initialize().unwrap();
        let listener = HttpListener::build(&tree, root).unwrap();

        // Every /a/b entry declines or fails, so the shallower endpoint answers.
        let dispatch = listener.create_request_handler(&tree, &request("h", "/a/b"));
        assert_eq!(body(&dispatch), Some("a"));
        assert_eq!(dispatch.context, a);

        let dispatch = listener.create_request_handler(&tree, &request("h", "/other"));
        assert_eq!(body(&dispatch), Some("root"));
    }

    #[test]
    fn test_entry_order_within_context() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let nested = builder.add_context(root, None, true);
        handler(&mut builder, nested, Decline);
        handler(&mut builder, root, Fixed("second"));
        handler(&mut builder, root, Fixed("third"));
        let tree = builder.initialize().unwrap();
        let listener = HttpListener::build(&tree, root).unwrap();

        let dispatch = listener.create_request_handler(&tree, &request("h", "/"));
        assert_eq!(body(&dispatch), Some("second"));
    }

    #[test]
    fn test_referenced_context_is_scanned() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let shared = builder.add_context(root, Some("shared"), true);
        handler(&mut builder, shared, Fixed("shared"));
        let endpoint = builder.add_endpoint(root, "/s");
        builder.add_ref_context(endpoint, "shared");
        let tree = builder.initialize().unwrap();
        let listener = HttpListener::build(&tree, root).unwrap();

        let dispatch = listener.create_request_handler(&tree, &request("h", "/s/x"));
        assert_eq!(body(&dispatch), Some("shared"));
        assert_eq!(dispatch.context, shared);
    }

    #[test]
    fn test_referenced_context_keeps_referrer_headers() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        let shared = builder.add_context(root, Some("shared"), true);
        builder.add_header(shared, "X-Tier", "shared").unwrap();
        handler(&mut builder, shared, Fixed("shared"));
        let endpoint = builder.add_endpoint(root, "/s");
        builder.add_header(endpoint, "X-Tier", "endpoint").unwrap();
        builder.add_header(endpoint, "X-Endpoint", "s").unwrap();
        builder.add_ref_context(endpoint, "shared");
        let tree = builder.initialize().unwrap();
        let listener = HttpListener::build(&tree, root).unwrap();

        let response = listener
            .create_request_handler(&tree, &request("h", "/s"))
            .response
            .unwrap();
        assert_eq!(response.headers()["x-endpoint"], "s");
        assert_eq!(response.headers()["x-tier"], "shared");
        assert_eq!(response.headers().get_all("x-tier").iter().count(), 1);
    }

    #[test]
    fn test_no_handler_and_header_injection() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        builder.add_header(root, "X-Served-By", "jerry").unwrap();
        let a = builder.add_endpoint(root, "/a");
        let b = builder.add_endpoint(root, "/b");
        handler(&mut builder, b, Fixed("b"));
        let tree = builder.initialize().unwrap();
        let listener = HttpListener::build(&tree, root).unwrap();

        let dispatch = listener.create_request_handler(&tree, &request("h", "/a"));
        assert!(dispatch.response.is_none());
        assert_eq!(dispatch.context, a);

        let dispatch = listener.create_request_handler(&tree, &request("h", "/b"));
        let response = dispatch.response.unwrap();
        assert_eq!(response.headers()["x-served-by"], "jerry");
        assert!(response.headers().contains_key("x-request-id"));
    }
}
