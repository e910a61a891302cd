//! Request handler capability.

use crate::error::HandlerError;
use crate::http::request::RequestContext;
use crate::http::response::Response;

/// Produces a response for a request, or declines it.
///
/// `Ok(None)` passes the request on to the next entry. Errors and panics are
/// caught by the listener and count as a decline.
pub trait RequestHandler: Send + Sync {
    fn accept(&self, request: &RequestContext<'_>) -> Result<Option<Response>, HandlerError>;
}
