//! Error types shared by the engine subsystems.

use std::io;

use thiserror::Error;

/// Structural errors raised while installing or initializing the context tree.
///
/// All of these are fatal at startup: the server refuses to run with a partially
/// built routing table.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Two applications were declared with the same name.
    #[error("application '{0}' is already defined")]
    DuplicateApplication(String),

    /// An application declared a second listener of the same kind.
    #[error("application '{application}' already has a {kind} listener")]
    DuplicateListener {
        application: String,
        kind: &'static str,
    },

    /// Two endpoints resolve to the same path within one host scope.
    #[error("endpoint '{path}' is registered twice in the same scope")]
    DuplicateEndpoint { path: String },

    /// A `ref_id` did not name any visible object or context.
    #[error("reference '{id}' could not be resolved")]
    UnresolvedReference { id: String },

    /// A referenced object exists but does not provide the requested capability.
    #[error("object '{id}' is not a {expected}")]
    WrongComponentKind { id: String, expected: &'static str },

    /// Context references form a loop.
    #[error("context reference cycle through '{id}'")]
    ReferenceCycle { id: String },

    /// No plugin factory is registered under this implementation name.
    #[error("unknown implementation '{0}'")]
    UnknownImplementation(String),

    /// A plugin factory rejected its settings.
    #[error("implementation '{implementation}' rejected its settings: {source}")]
    Plugin {
        implementation: String,
        #[source]
        source: PluginError,
    },

    /// A host was declared somewhere other than directly under a listener or a plain context.
    #[error("host '{pattern}' cannot be nested inside {parent}")]
    MisplacedHost { pattern: String, parent: String },

    /// An entry kind that the listener's transport cannot serve.
    #[error("{entry} entries are not allowed in a {listener} listener")]
    WrongListenerKind {
        entry: &'static str,
        listener: &'static str,
    },

    /// A response header name or value is not valid HTTP.
    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    /// An error document file could not be read.
    #[error("failed to read error document '{path}': {source}")]
    ErrorDocument {
        path: String,
        #[source]
        source: io::Error,
    },

    /// A configured entry lacks a field its kind requires.
    #[error("{kind} entry is missing '{field}'")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    /// An object's initialization hook failed.
    #[error("object '{id}' failed to initialize: {reason}")]
    Initialization { id: String, reason: String },
}

/// Result type for engine construction.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by request handlers, message handlers and procedures.
///
/// These never cross the dispatch boundary: the listener logs them and treats the
/// entry as having produced no response.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid response: {0}")]
    Http(#[from] axum::http::Error),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by plugin factories when building a component from settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("missing setting '{0}'")]
    MissingSetting(String),

    #[error("invalid value '{value}' for setting '{key}'")]
    InvalidSetting { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::DuplicateListener {
            application: "shop".into(),
            kind: "http",
        };
        assert_eq!(err.to_string(), "application 'shop' already has a http listener");

        let err = EngineError::Plugin {
            implementation: "jerry/builtin/http/static".into(),
            source: PluginError::InvalidSetting {
                key: "status".into(),
                value: "abc".into(),
            },
        };
        assert!(err.to_string().contains("status"));
    }
}
