//! Built-in request handlers.

use std::sync::{Arc, OnceLock};

use axum::http::{header, Method, StatusCode};
use bytes::Bytes;
use serde_json::json;

use crate::context::object::{downcast_object, Object, ObjectScope};
use crate::error::{EngineError, EngineResult, HandlerError, PluginError};
use crate::http::handler::RequestHandler;
use crate::http::request::RequestContext;
use crate::http::response::{build_response, Response};
use crate::plugin::builtin::object::ValueObject;
use crate::plugin::registry::Settings;

fn parse_status(settings: &Settings, key: &str, default: StatusCode) -> Result<StatusCode, PluginError> {
    match settings.parse::<u16>(key)? {
        None => Ok(default),
        Some(code) => StatusCode::from_u16(code).map_err(|_| PluginError::InvalidSetting {
            key: key.to_string(),
            value: code.to_string(),
        }),
    }
}

fn parse_methods(settings: &Settings) -> Result<Vec<Method>, PluginError> {
    let Some(list) = settings.get("methods") else {
        return Ok(Vec::new());
    };
    list.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|m| {
            Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| PluginError::InvalidSetting {
                key: "methods".to_string(),
                value: m.to_string(),
            })
        })
        .collect()
}

/// Fixed response.
///
/// Settings: `status` (200), `content-type` (`text/plain; charset=utf-8`),
/// `body`, `body-ref` (id of a value object, resolved at initialization),
/// `methods` (comma list; other methods are declined).
pub struct StaticHandler {
    status: StatusCode,
    content_type: String,
    body: Bytes,
    body_ref: Option<String>,
    resolved: OnceLock<Bytes>,
    methods: Vec<Method>,
}

impl StaticHandler {
    pub fn from_settings(settings: &Settings) -> Result<Self, PluginError> {
        Ok(Self {
            status: parse_status(settings, "status", StatusCode::OK)?,
            content_type: settings
                .get("content-type")
                .unwrap_or("text/plain; charset=utf-8")
                .to_string(),
            body: Bytes::from(settings.get("body").unwrap_or_default().to_string()),
            body_ref: settings.get("body-ref").map(str::to_string),
            resolved: OnceLock::new(),
            methods: parse_methods(settings)?,
        })
    }

    fn body(&self) -> Bytes {
        self.resolved.get().cloned().unwrap_or_else(|| self.body.clone())
    }
}

impl Object for StaticHandler {
    fn initialize(&self, scope: &ObjectScope<'_>) -> EngineResult<()> {
        let Some(id) = &self.body_ref else {
            return Ok(());
        };
        let object = scope
            .find_object(id)
            .ok_or_else(|| EngineError::UnresolvedReference { id: id.clone() })?;
        let value = downcast_object::<ValueObject>(object).ok_or_else(|| EngineError::Initialization {
            id: id.clone(),
            reason: "body-ref must name a value object".to_string(),
        })?;
        let _ = self.resolved.set(Bytes::from(value.value().to_string()));
        Ok(())
    }

    fn as_request_handler(self: Arc<Self>) -> Option<Arc<dyn RequestHandler>> {
        Some(self)
    }
}

impl RequestHandler for StaticHandler {
    fn accept(&self, request: &RequestContext<'_>) -> Result<Option<Response>, HandlerError> {
        if !self.methods.is_empty() && !self.methods.contains(request.request().method()) {
            return Ok(None);
        }
        Ok(Some(build_response(self.status, &self.content_type, self.body())?))
    }
}

/// Reflects the request as JSON. Useful for checking routing.
///
/// Settings: `label` (included in the output when set).
pub struct EchoHandler {
    label: Option<String>,
}

impl EchoHandler {
    pub fn from_settings(settings: &Settings) -> Result<Self, PluginError> {
        Ok(Self {
            label: settings.get("label").map(str::to_string),
        })
    }
}

impl Object for EchoHandler {
    fn as_request_handler(self: Arc<Self>) -> Option<Arc<dyn RequestHandler>> {
        Some(self)
    }
}

impl RequestHandler for EchoHandler {
    fn accept(&self, request: &RequestContext<'_>) -> Result<Option<Response>, HandlerError> {
        let http = request.request();
        let body = json!({
            "request_id": http.id().to_string(),
            "method": http.method().as_str(),
            "host": http.host(),
            "path": http.path(),
            "query": http.uri().query(),
            "context": request.context().to_string(),
            "label": self.label,
            "body": String::from_utf8_lossy(http.body()),
        });
        let body = serde_json::to_vec(&body)?;
        Ok(Some(build_response(StatusCode::OK, "application/json", body)?))
    }
}

/// Redirects every request.
///
/// Settings: `location` (required), `status` (302, must be 3xx).
pub struct RedirectHandler {
    status: StatusCode,
    location: String,
}

impl RedirectHandler {
    pub fn from_settings(settings: &Settings) -> Result<Self, PluginError> {
        let status = parse_status(settings, "status", StatusCode::FOUND)?;
        if !status.is_redirection() {
            return Err(PluginError::InvalidSetting {
                key: "status".to_string(),
                value: status.as_u16().to_string(),
            });
        }
        Ok(Self {
            status,
            location: settings.require("location")?.to_string(),
        })
    }
}

impl Object for RedirectHandler {
    fn as_request_handler(self: Arc<Self>) -> Option<Arc<dyn RequestHandler>> {
        Some(self)
    }
}

impl RequestHandler for RedirectHandler {
    fn accept(&self, _request: &RequestContext<'_>) -> Result<Option<Response>, HandlerError> {
        let response = axum::http::Response::builder()
            .status(self.status)
            .header(header::LOCATION, self.location.as_str())
            .body(Bytes::new())?;
        Ok(Some(response))
    }
}
