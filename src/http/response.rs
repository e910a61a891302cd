//! Response construction and header injection.
//!
//! # Responsibilities
//! - Add inherited context headers to handler responses
//! - Echo the request id as `x-request-id`
//! - Render error documents for error statuses
//!
//! # Design Decisions
//! - Handler-set headers win over inherited ones
//! - Error documents only fill empty bodies, never replace handler output

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;

use crate::context::node::ContextId;
use crate::context::tree::ContextTree;
use crate::error::HandlerError;
use crate::http::request::{RequestId, X_REQUEST_ID};

/// Fully buffered response produced by a request handler.
pub type Response = axum::http::Response<Bytes>;

/// Build a response with a content type.
pub fn build_response(
    status: StatusCode,
    content_type: &str,
    body: impl Into<Bytes>,
) -> Result<Response, HandlerError> {
    Ok(axum::http::Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())?)
}

/// Response proxy of one request: injects the effective headers of the
/// handling context before the response leaves the engine.
pub struct Connection<'a> {
    headers: &'a HeaderMap,
    request_id: RequestId,
}

impl<'a> Connection<'a> {
    pub fn new(headers: &'a HeaderMap, request_id: RequestId) -> Self {
        Self { headers, request_id }
    }

    pub fn send(&self, mut response: Response) -> Response {
        let target = response.headers_mut();
        for name in self.headers.keys() {
            if target.contains_key(name) {
                continue;
            }
            for value in self.headers.get_all(name) {
                target.append(name.clone(), value.clone());
            }
        }
        target.insert(X_REQUEST_ID, self.request_id.header_value());
        response
    }
}

/// Fill an empty error response with the context's error document, if any.
pub fn apply_error_document(tree: &ContextTree, context: ContextId, mut response: Response) -> Response {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) || !response.body().is_empty() {
        return response;
    }
    if let Some(document) = tree.error_document(context, status.as_u16()) {
        if let Ok(value) = HeaderValue::from_str(&document.content_type) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        *response.body_mut() = document.body.clone();
    }
    response
}

/// Response for a request nothing handled (or that failed outright).
pub fn render_error(tree: &ContextTree, context: ContextId, status: StatusCode, request_id: RequestId) -> Response {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    let mut response = apply_error_document(tree, context, response);
    if response.body().is_empty() {
        let reason = status.canonical_reason().unwrap_or("Error");
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        *response.body_mut() = Bytes::from(format!("{} {}\n", status.as_u16(), reason));
    }
    Connection::new(tree.headers(context), request_id).send(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::builder::ContextTreeBuilder;
    use crate::context::node::ErrorDocument;

    #[test]
    fn test_connection_injects_missing_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
        headers.insert("cache-control", HeaderValue::from_static("no-store"));
        let id = RequestId::new();

        let mut response = build_response(StatusCode::OK, "text/plain", "ok").unwrap();
        response
            .headers_mut()
            .insert("cache-control", HeaderValue::from_static("max-age=60"));

        let response = Connection::new(&headers, id).send(response);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["cache-control"], "max-age=60");
        assert_eq!(response.headers()[X_REQUEST_ID], id.to_string().as_str());
    }

    #[test]
    fn test_render_error_uses_document() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        builder.add_error_document(root, 404, ErrorDocument::new("text/html", "<h1>missing</h1>"));
        let endpoint = builder.add_endpoint(root, "/a");
        let tree = builder.initialize().unwrap();

        let response = render_error(&tree, endpoint, StatusCode::NOT_FOUND, RequestId::new());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(response.body(), "<h1>missing</h1>");

        let response = render_error(&tree, endpoint, StatusCode::INTERNAL_SERVER_ERROR, RequestId::new());
        assert_eq!(response.body(), "500 Internal Server Error\n");
    }

    #[test]
    fn test_error_document_keeps_handler_body() {
        let mut builder = ContextTreeBuilder::new();
        let root = builder.root();
        builder.add_error_document(root, 403, ErrorDocument::new("text/html", "doc"));
        let tree = builder.initialize().unwrap();

        let response = build_response(StatusCode::FORBIDDEN, "text/plain", "custom").unwrap();
        let response = apply_error_document(&tree, root, response);
        assert_eq!(response.body(), "custom");

        let response = build_response(StatusCode::FORBIDDEN, "text/plain", Bytes::new()).unwrap();
        let response = apply_error_document(&tree, root, response);
        assert_eq!(response.body(), "doc");
    }
}
