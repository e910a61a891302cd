//! HTTP socket.
//!
//! # Responsibilities
//! - Bind the configured address and serve it with axum
//! - Buffer each request and hand it to the engine's listener dispatch
//! - Wire up middleware (tracing, request timeout)
//! - Shut down gracefully on release
//!
//! # Design Decisions
//! - Each socket owns an OS thread and a tokio runtime, so the daemon stays synchronous
//! - Dispatch runs on the blocking pool: handlers are plain synchronous code
//! - The socket holds a running state until the server task has fully returned

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::sync::oneshot;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::config::schema::HttpServerConfig;
use crate::engine::Engine;
use crate::http::request::HttpRequest;
use crate::lifecycle::daemon::{RunningState, Service};
use crate::lifecycle::state::LifecycleError;
use crate::observability::metrics;

/// State injected into the dispatch handler.
#[derive(Clone)]
struct SocketContext {
    engine: Arc<Engine>,
    applications: Arc<Vec<String>>,
    max_body_bytes: usize,
}

#[derive(Default)]
struct SocketState {
    shutdown: Option<oneshot::Sender<()>>,
    local_addr: Option<SocketAddr>,
}

/// An HTTP server socket serving a list of applications.
pub struct HttpSocket {
    id: String,
    bind_address: String,
    request_timeout: Duration,
    worker_threads: usize,
    context: SocketContext,
    state: Mutex<SocketState>,
}

impl HttpSocket {
    pub fn new(config: &HttpServerConfig, engine: Arc<Engine>) -> Self {
        Self {
            id: config.id.clone(),
            bind_address: config.bind_address.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            worker_threads: config.worker_threads.max(1),
            context: SocketContext {
                engine,
                applications: Arc::new(config.applications.clone()),
                max_body_bytes: config.max_body_bytes,
            },
            state: Mutex::new(SocketState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Address actually bound by the last start; useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    fn lock(&self) -> MutexGuard<'_, SocketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(&self) -> Router {
        Router::new()
            .route("/{*path}", any(dispatch))
            .route("/", any(dispatch))
            .with_state(self.context.clone())
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(TraceLayer::new_for_http())
    }
}

impl Service for HttpSocket {
    fn name(&self) -> &str {
        &self.id
    }

    fn start(&self, running: RunningState) -> Result<(), LifecycleError> {
        let mut state = self.lock();
        if state.shutdown.is_some() {
            return Err(LifecycleError::AlreadyRunning(self.id.clone()));
        }

        let socket_error = |source| LifecycleError::SocketStart {
            service: self.id.clone(),
            source,
        };
        let listener = std::net::TcpListener::bind(&self.bind_address).map_err(socket_error)?;
        listener.set_nonblocking(true).map_err(socket_error)?;
        let local_addr = listener.local_addr().map_err(socket_error)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.worker_threads)
            .thread_name(format!("jerry-http-{}", self.id))
            .enable_all()
            .build()
            .map_err(socket_error)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = self.build_router().into_make_service_with_connect_info::<SocketAddr>();
        let id = self.id.clone();

        thread::Builder::new()
            .name(format!("jerry-http-{}", self.id))
            .spawn(move || {
                let result = runtime.block_on(async {
                    let listener = tokio::net::TcpListener::from_std(listener)?;
                    info!(server = %id, address = %local_addr, "HTTP server starting");
                    axum::serve(listener, app)
                        .with_graceful_shutdown(async {
                            let _ = shutdown_rx.await;
                        })
                        .await
                });
                match result {
                    Ok(()) => info!(server = %id, "HTTP server stopped"),
                    Err(e) => error!(server = %id, error = %e, "HTTP server failed"),
                }
                runtime.shutdown_timeout(Duration::from_secs(1));
                drop(running);
            })
            .map_err(socket_error)?;

        state.shutdown = Some(shutdown_tx);
        state.local_addr = Some(local_addr);
        Ok(())
    }

    fn release(&self) {
        if let Some(shutdown) = self.lock().shutdown.take() {
            debug!(server = %self.id, "HTTP server shutting down");
            let _ = shutdown.send(());
        }
    }
}

/// Forward one request into listener dispatch.
async fn dispatch(
    State(context): State<SocketContext>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, context.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %parts.uri.path(), error = %e, "Request body rejected");
            metrics::record_request(parts.method.as_str(), 413, started);
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let request = HttpRequest::new(parts.method, parts.uri)
        .with_headers(parts.headers)
        .with_body(body)
        .with_remote_addr(remote);

    let engine = context.engine.clone();
    let applications = context.applications.clone();
    match tokio::task::spawn_blocking(move || engine.respond_http(&applications, &request)).await {
        Ok(response) => response.map(Body::from),
        Err(e) => {
            error!(error = %e, "Dispatch task failed");
            metrics::record_handler_error("dispatch");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}
