//! Configuration schema definitions.
//!
//! Every type derives Serde traits for deserialization from TOML. Sections
//! and most fields carry defaults so a minimal file only names what it needs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::plugin::registry::Settings;

/// Root configuration of a Jerry process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct JerryConfig {
    pub logging: LoggingConfig,

    pub observability: ObservabilityConfig,

    pub daemon: DaemonConfig,

    /// Engine-global objects, visible to every application.
    pub objects: Vec<ObjectConfig>,

    /// Entries of the global context. Only named contexts and procedures are
    /// useful here; routing entries belong to listeners.
    pub entries: Vec<EntryConfig>,

    pub applications: Vec<ApplicationConfig>,

    pub http_servers: Vec<HttpServerConfig>,

    pub brokers: Vec<BrokerConfig>,
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for the `jerry` target when `RUST_LOG` is unset.
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Serve a Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Upper bound on waiting for services to stop after release.
    pub stop_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { stop_timeout_ms: 10_000 }
    }
}

/// An object created by a plugin and registered under an id.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectConfig {
    pub id: String,

    pub implementation: String,

    #[serde(default)]
    pub settings: BTreeMap<String, toml::Value>,
}

/// One application and its listeners.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplicationConfig {
    pub name: String,

    /// Plugin library the application comes from, informational.
    #[serde(default)]
    pub library: Option<String>,

    /// Objects and entries of the application context itself.
    #[serde(flatten)]
    pub context: ContextConfig,

    #[serde(default)]
    pub http_listener: Option<ContextConfig>,

    #[serde(default)]
    pub basic_listener: Option<ContextConfig>,
}

/// Settings shared by every context-like node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Inherit response headers and error documents from the parent.
    pub inherit: bool,

    /// Continue object lookups in the parent.
    pub inherit_objects: bool,

    pub headers: BTreeMap<String, String>,

    pub error_documents: Vec<ErrorDocumentConfig>,

    pub objects: Vec<ObjectConfig>,

    pub entries: Vec<EntryConfig>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            inherit: true,
            inherit_objects: true,
            headers: BTreeMap::new(),
            error_documents: Vec::new(),
            objects: Vec::new(),
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Context,
    RefContext,
    Endpoint,
    Host,
    Queue,
    RequestHandler,
    MessageHandler,
    Procedure,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Context => "context",
            EntryKind::RefContext => "ref-context",
            EntryKind::Endpoint => "endpoint",
            EntryKind::Host => "host",
            EntryKind::Queue => "queue",
            EntryKind::RequestHandler => "request-handler",
            EntryKind::MessageHandler => "message-handler",
            EntryKind::Procedure => "procedure",
        }
    }

    /// Kinds built from a plugin or an object reference.
    pub fn is_component(&self) -> bool {
        matches!(
            self,
            EntryKind::RequestHandler | EntryKind::MessageHandler | EntryKind::Procedure
        )
    }

    /// Kinds that open a nested context.
    pub fn is_context(&self) -> bool {
        matches!(
            self,
            EntryKind::Context | EntryKind::Endpoint | EntryKind::Host | EntryKind::Queue
        )
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One routable entry. Which fields apply depends on `kind`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntryConfig {
    pub kind: EntryKind,

    /// Endpoint path.
    #[serde(default)]
    pub path: Option<String>,

    /// Host pattern, `*` wildcards allowed.
    #[serde(default)]
    pub server_name: Option<String>,

    /// Queue name.
    #[serde(default)]
    pub queue: Option<String>,

    /// Named context id, or object id to publish an inline component under.
    #[serde(default)]
    pub id: Option<String>,

    /// Referenced context or object.
    #[serde(default)]
    pub ref_id: Option<String>,

    #[serde(default)]
    pub implementation: Option<String>,

    #[serde(default)]
    pub settings: BTreeMap<String, toml::Value>,

    /// Procedure worker threads.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Nested context settings for context-like kinds.
    #[serde(flatten)]
    pub context: ContextConfig,
}

fn default_threads() -> usize {
    1
}

/// Body served for an error status.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorDocumentConfig {
    pub status: u16,

    #[serde(default = "default_error_content_type")]
    pub content_type: String,

    /// Inline body.
    #[serde(default)]
    pub body: Option<String>,

    /// Read from disk at install time.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_error_content_type() -> String {
    "text/html; charset=utf-8".to_string()
}

/// An HTTP socket serving one or more applications.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    pub id: String,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Applications tried in order for each request.
    #[serde(default)]
    pub applications: Vec<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_worker_threads() -> usize {
    2
}

/// An in-memory message broker feeding basic listeners.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    pub id: String,

    #[serde(default)]
    pub applications: Vec<String>,
}

/// Flatten TOML settings into plugin settings. Arrays become repeated keys.
pub fn to_settings(values: &BTreeMap<String, toml::Value>) -> Settings {
    let mut settings = Settings::new();
    for (key, value) in values {
        match value {
            toml::Value::Array(items) => {
                for item in items {
                    settings.push(key.as_str(), scalar(item));
                }
            }
            other => settings.push(key.as_str(), scalar(other)),
        }
    }
    settings
}

fn scalar(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
