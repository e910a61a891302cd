//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (servers and brokers name existing applications)
//! - Validate value ranges (timeouts > 0, status codes, socket addresses)
//! - Check that each entry carries the fields its kind requires
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: JerryConfig → Result<(), Vec<ValidationError>>
//! - Runs before the config is installed into an engine

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{
    ContextConfig, EntryConfig, EntryKind, ErrorDocumentConfig, JerryConfig, ObjectConfig,
};

/// One semantic problem, with the config location it was found at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{location}: {message}")]
pub struct ValidationError {
    pub location: String,
    pub message: String,
}

impl ValidationError {
    fn new(location: &str, message: impl Into<String>) -> Self {
        Self {
            location: location.to_string(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &JerryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability",
            format!("invalid metrics_address '{}'", config.observability.metrics_address),
        ));
    }
    if config.daemon.stop_timeout_ms == 0 {
        errors.push(ValidationError::new("daemon", "stop_timeout_ms must be > 0"));
    }

    validate_objects("global", &config.objects, &mut errors);
    validate_entries("global", &config.entries, &mut errors);

    let mut applications = HashSet::new();
    for app in &config.applications {
        let location = format!("application '{}'", app.name);
        if app.name.trim().is_empty() {
            errors.push(ValidationError::new("applications", "application name is empty"));
        }
        if !applications.insert(app.name.as_str()) {
            errors.push(ValidationError::new(&location, "duplicate application name"));
        }
        validate_context(&location, &app.context, &mut errors);
        if let Some(listener) = &app.http_listener {
            validate_context(&format!("{}.http_listener", location), listener, &mut errors);
        }
        if let Some(listener) = &app.basic_listener {
            validate_context(&format!("{}.basic_listener", location), listener, &mut errors);
        }
    }

    let mut servers = HashSet::new();
    for server in &config.http_servers {
        let location = format!("http_server '{}'", server.id);
        if !servers.insert(server.id.as_str()) {
            errors.push(ValidationError::new(&location, "duplicate server id"));
        }
        if server.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                &location,
                format!("invalid bind_address '{}'", server.bind_address),
            ));
        }
        if server.request_timeout_secs == 0 {
            errors.push(ValidationError::new(&location, "request_timeout_secs must be > 0"));
        }
        if server.worker_threads == 0 {
            errors.push(ValidationError::new(&location, "worker_threads must be > 0"));
        }
        check_applications(&location, &server.applications, &applications, &mut errors);
        for name in &server.applications {
            let has_listener = config
                .applications
                .iter()
                .any(|app| &app.name == name && app.http_listener.is_some());
            if applications.contains(name.as_str()) && !has_listener {
                errors.push(ValidationError::new(
                    &location,
                    format!("application '{}' has no http_listener", name),
                ));
            }
        }
    }

    let mut brokers = HashSet::new();
    for broker in &config.brokers {
        let location = format!("broker '{}'", broker.id);
        if !brokers.insert(broker.id.as_str()) {
            errors.push(ValidationError::new(&location, "duplicate broker id"));
        }
        check_applications(&location, &broker.applications, &applications, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_applications(
    location: &str,
    names: &[String],
    known: &HashSet<&str>,
    errors: &mut Vec<ValidationError>,
) {
    for name in names {
        if !known.contains(name.as_str()) {
            errors.push(ValidationError::new(location, format!("unknown application '{}'", name)));
        }
    }
}

fn validate_context(location: &str, context: &ContextConfig, errors: &mut Vec<ValidationError>) {
    for doc in &context.error_documents {
        validate_error_document(location, doc, errors);
    }
    validate_objects(location, &context.objects, errors);
    validate_entries(location, &context.entries, errors);
}

fn validate_objects(location: &str, objects: &[ObjectConfig], errors: &mut Vec<ValidationError>) {
    for object in objects {
        if object.id.trim().is_empty() {
            errors.push(ValidationError::new(location, "object with empty id"));
        }
        if object.implementation.trim().is_empty() {
            errors.push(ValidationError::new(
                location,
                format!("object '{}' has no implementation", object.id),
            ));
        }
    }
}

fn validate_error_document(location: &str, doc: &ErrorDocumentConfig, errors: &mut Vec<ValidationError>) {
    if !(400..=599).contains(&doc.status) {
        errors.push(ValidationError::new(
            location,
            format!("error document status {} is not an error status", doc.status),
        ));
    }
    if doc.body.is_some() == doc.file.is_some() {
        errors.push(ValidationError::new(
            location,
            format!("error document {} needs exactly one of body or file", doc.status),
        ));
    }
}

fn validate_entries(location: &str, entries: &[EntryConfig], errors: &mut Vec<ValidationError>) {
    for (index, entry) in entries.iter().enumerate() {
        let here = format!("{}.entries[{}] ({})", location, index, entry.kind);
        let missing = |field: &str| ValidationError::new(&here, format!("missing '{}'", field));

        match entry.kind {
            EntryKind::Endpoint if entry.path.is_none() => errors.push(missing("path")),
            EntryKind::Host if entry.server_name.is_none() => errors.push(missing("server_name")),
            EntryKind::Queue if entry.queue.is_none() => errors.push(missing("queue")),
            EntryKind::RefContext if entry.ref_id.is_none() => errors.push(missing("ref_id")),
            _ => {}
        }

        if entry.kind.is_component() {
            match (&entry.implementation, &entry.ref_id) {
                (None, None) => errors.push(ValidationError::new(
                    &here,
                    "needs either 'implementation' or 'ref_id'",
                )),
                (Some(_), Some(_)) => errors.push(ValidationError::new(
                    &here,
                    "'implementation' and 'ref_id' are mutually exclusive",
                )),
                _ => {}
            }
            if entry.ref_id.is_some() && entry.id.is_some() {
                errors.push(ValidationError::new(&here, "a referenced component cannot declare 'id'"));
            }
        }

        if entry.kind.is_context() {
            validate_context(&here, &entry.context, errors);
        } else if !entry.context.entries.is_empty() || !entry.context.objects.is_empty() {
            errors.push(ValidationError::new(&here, "only context kinds can have nested entries or objects"));
        }
    }
}
