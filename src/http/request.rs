//! Base HTTP request and the request-scoped context handed to handlers.
//!
//! # Responsibilities
//! - Assign every request a unique id (UUID v4)
//! - Extract routing-relevant information (host, path)
//! - Bind a request to the context that is handling it
//!
//! # Design Decisions
//! - Request ID assigned as early as possible for tracing
//! - `RequestContext` borrows everything; it never outlives one dispatch
//! - Engine objects shadow request objects of the same id

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderValue, Method, Uri};
use bytes::Bytes;
use uuid::Uuid;

use crate::context::node::{ContextId, ErrorDocument};
use crate::context::object::{downcast_object, Object, ObjectContext};
use crate::context::tree::ContextTree;
use crate::http::response::Connection;
use crate::routing::matcher::strip_port;

/// Header carrying the request id on responses.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Unique request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn header_value(&self) -> HeaderValue {
        // A hyphenated UUID is always a valid header value.
        HeaderValue::from_str(&self.0.to_string()).unwrap_or_else(|_| HeaderValue::from_static("unknown"))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A fully buffered inbound HTTP request, as delivered by a transport socket.
pub struct HttpRequest {
    id: RequestId,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    objects: ObjectContext,
}

impl HttpRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            id: RequestId::new(),
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
            objects: ObjectContext::new(),
        }
    }

    /// Convenience constructor for `GET` requests; invalid URIs fall back to `/`.
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri.parse().unwrap_or_else(|_| Uri::from_static("/")))
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Attach a transport-provided object, visible after engine objects.
    pub fn with_object(mut self, id: impl Into<String>, object: Arc<dyn Object>) -> Self {
        self.objects.add_object(id, object);
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn objects(&self) -> &ObjectContext {
        &self.objects
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Host name without port, from the `Host` header or the URI authority.
    pub fn host(&self) -> &str {
        let raw = self
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| self.uri.host())
            .unwrap_or("");
        strip_port(raw)
    }
}

/// A request bound to the context whose entry is handling it.
#[derive(Clone, Copy)]
pub struct RequestContext<'a> {
    request: &'a HttpRequest,
    tree: &'a ContextTree,
    context: ContextId,
}

impl<'a> RequestContext<'a> {
    pub fn new(request: &'a HttpRequest, tree: &'a ContextTree, context: ContextId) -> Self {
        Self { request, tree, context }
    }

    pub fn request(&self) -> &'a HttpRequest {
        self.request
    }

    pub fn tree(&self) -> &'a ContextTree {
        self.tree
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Engine objects first, then objects attached by the transport.
    pub fn find_object(&self, id: &str) -> Option<&'a Arc<dyn Object>> {
        self.tree
            .find_object(self.context, id)
            .or_else(|| self.request.objects.get(id))
    }

    pub fn find_object_as<T: Object>(&self, id: &str) -> Option<&'a T> {
        self.find_object(id).and_then(downcast_object::<T>)
    }

    /// Effective response headers of the handling context.
    pub fn headers(&self) -> &'a HeaderMap {
        self.tree.headers(self.context)
    }

    pub fn error_document(&self, status: u16) -> Option<&'a ErrorDocument> {
        self.tree.error_document(self.context, status)
    }

    /// Response proxy that adds the inherited headers.
    pub fn connection(&self) -> Connection<'a> {
        Connection::new(self.headers(), self.request.id)
    }
}
