//! Translate a validated configuration into engine builder calls.
//!
//! # Responsibilities
//! - Create plugin components by implementation name
//! - Mirror the config nesting as contexts, endpoints, hosts and queues
//! - Attach response headers and error documents
//!
//! # Design Decisions
//! - Runs once at startup; the resulting engine is never reconfigured
//! - Every failure is fatal: a half-installed tree is discarded
//! - An inline component with an `id` is also published as an object of its
//!   parent context, so other entries can reference it

use std::fs;
use std::sync::Arc;

use tracing::debug;

use crate::config::schema::{
    to_settings, ContextConfig, EntryConfig, EntryKind, ErrorDocumentConfig, JerryConfig, ObjectConfig,
};
use crate::context::builder::ContextTreeBuilder;
use crate::context::entry::Component;
use crate::context::node::{ContextId, ErrorDocument};
use crate::context::object::Object;
use crate::engine::EngineBuilder;
use crate::error::{EngineError, EngineResult};
use crate::plugin::registry::PluginRegistry;

/// Build the install phase of an engine from `config`.
pub fn install(config: &JerryConfig, plugins: &PluginRegistry) -> EngineResult<EngineBuilder> {
    let mut builder = EngineBuilder::new();
    let global = builder.global();

    install_objects(builder.tree(), global, &config.objects, plugins)?;
    for entry in &config.entries {
        install_entry(builder.tree(), global, entry, plugins)?;
    }

    for app in &config.applications {
        let context = builder.add_application(&app.name, app.library.as_deref())?;
        install_context(builder.tree(), context, &app.context, plugins)?;

        if let Some(listener) = &app.http_listener {
            let context = builder.add_http_listener(&app.name)?;
            install_context(builder.tree(), context, listener, plugins)?;
        }
        if let Some(listener) = &app.basic_listener {
            let context = builder.add_basic_listener(&app.name)?;
            install_context(builder.tree(), context, listener, plugins)?;
        }
        debug!(application = %app.name, "Application installed");
    }

    Ok(builder)
}

fn install_context(
    tree: &mut ContextTreeBuilder,
    context: ContextId,
    config: &ContextConfig,
    plugins: &PluginRegistry,
) -> EngineResult<()> {
    tree.set_inherit(context, config.inherit);
    tree.set_inherit_objects(context, config.inherit_objects);
    for (name, value) in &config.headers {
        tree.add_header(context, name, value)?;
    }
    for doc in &config.error_documents {
        tree.add_error_document(context, doc.status, load_error_document(doc)?);
    }
    install_objects(tree, context, &config.objects, plugins)?;
    for entry in &config.entries {
        install_entry(tree, context, entry, plugins)?;
    }
    Ok(())
}

fn install_objects(
    tree: &mut ContextTreeBuilder,
    context: ContextId,
    objects: &[ObjectConfig],
    plugins: &PluginRegistry,
) -> EngineResult<()> {
    for object in objects {
        let created = plugins.create(&object.implementation, &to_settings(&object.settings))?;
        tree.add_object(context, object.id.as_str(), created);
    }
    Ok(())
}

fn load_error_document(config: &ErrorDocumentConfig) -> EngineResult<ErrorDocument> {
    let body = match (&config.body, &config.file) {
        (Some(body), _) => body.clone().into_bytes(),
        (None, Some(path)) => fs::read(path).map_err(|source| EngineError::ErrorDocument {
            path: path.clone(),
            source,
        })?,
        (None, None) => Vec::new(),
    };
    Ok(ErrorDocument::new(config.content_type.as_str(), body))
}

fn required<'a>(value: &'a Option<String>, kind: EntryKind, field: &'static str) -> EngineResult<&'a str> {
    value.as_deref().ok_or(EngineError::MissingField {
        kind: kind.as_str(),
        field,
    })
}

/// An inline component, or the id it references.
enum Source {
    Inline(Arc<dyn Object>),
    Ref(String),
}

fn component_source(entry: &EntryConfig, plugins: &PluginRegistry) -> EngineResult<Source> {
    match (&entry.implementation, &entry.ref_id) {
        (Some(implementation), _) => Ok(Source::Inline(
            plugins.create(implementation, &to_settings(&entry.settings))?,
        )),
        (None, Some(id)) => Ok(Source::Ref(id.clone())),
        (None, None) => Err(EngineError::MissingField {
            kind: entry.kind.as_str(),
            field: "implementation",
        }),
    }
}

fn install_entry(
    tree: &mut ContextTreeBuilder,
    parent: ContextId,
    entry: &EntryConfig,
    plugins: &PluginRegistry,
) -> EngineResult<()> {
    let kind = entry.kind;
    match kind {
        EntryKind::Context => {
            let context = tree.add_context(parent, entry.id.as_deref(), entry.context.inherit_objects);
            install_context(tree, context, &entry.context, plugins)
        }
        EntryKind::RefContext => {
            tree.add_ref_context(parent, required(&entry.ref_id, kind, "ref_id")?);
            Ok(())
        }
        EntryKind::Endpoint => {
            let context = tree.add_endpoint(parent, required(&entry.path, kind, "path")?);
            install_context(tree, context, &entry.context, plugins)
        }
        EntryKind::Host => {
            let context = tree.add_host(parent, required(&entry.server_name, kind, "server_name")?);
            install_context(tree, context, &entry.context, plugins)
        }
        EntryKind::Queue => {
            let context = tree.add_queue(parent, required(&entry.queue, kind, "queue")?);
            install_context(tree, context, &entry.context, plugins)
        }
        EntryKind::RequestHandler | EntryKind::MessageHandler | EntryKind::Procedure => {
            install_component(tree, parent, entry, plugins)
        }
    }
}

fn install_component(
    tree: &mut ContextTreeBuilder,
    parent: ContextId,
    entry: &EntryConfig,
    plugins: &PluginRegistry,
) -> EngineResult<()> {
    let object = match component_source(entry, plugins)? {
        Source::Ref(id) => {
            match entry.kind {
                EntryKind::RequestHandler => tree.add_request_handler(parent, Component::Ref(id)),
                EntryKind::MessageHandler => tree.add_message_handler(parent, Component::Ref(id)),
                _ => tree.add_procedure(parent, Component::Ref(id), entry.threads),
            }
            return Ok(());
        }
        Source::Inline(object) => object,
    };

    let Some(id) = &entry.id else {
        return match entry.kind {
            EntryKind::RequestHandler => tree.add_request_handler_object(parent, object),
            EntryKind::MessageHandler => tree.add_message_handler_object(parent, object),
            _ => tree.add_procedure_object(parent, object, entry.threads),
        };
    };

    // Published objects are initialized through the object registry.
    let wrong_kind = |expected: &'static str| EngineError::WrongComponentKind {
        id: id.clone(),
        expected,
    };
    match entry.kind {
        EntryKind::RequestHandler => {
            let handler = object
                .clone()
                .as_request_handler()
                .ok_or_else(|| wrong_kind("request handler"))?;
            tree.add_request_handler(parent, Component::Owned(handler));
        }
        EntryKind::MessageHandler => {
            let handler = object
                .clone()
                .as_message_handler()
                .ok_or_else(|| wrong_kind("message handler"))?;
            tree.add_message_handler(parent, Component::Owned(handler));
        }
        _ => {
            let procedure = object
                .clone()
                .as_procedure()
                .ok_or_else(|| wrong_kind("procedure"))?;
            tree.add_procedure(parent, Component::Owned(procedure), entry.threads);
        }
    }
    tree.add_object(parent, id.as_str(), object);
    Ok(())
}
