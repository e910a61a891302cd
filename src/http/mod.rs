//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum socket, body buffering, trace + timeout layers)
//!     → request.rs (HttpRequest with a fresh request id)
//!     → routing (listener picks host, endpoints, handler)
//!     → handler.rs (RequestHandler::accept)
//!     → response.rs (connection headers, error documents)
//!     → Send to client
//! ```

pub mod handler;
pub mod request;
pub mod response;
pub mod server;

pub use handler::RequestHandler;
pub use request::{HttpRequest, RequestContext, RequestId, X_REQUEST_ID};
pub use response::{build_response, Connection, Response};
pub use server::HttpSocket;
