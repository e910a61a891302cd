//! Startup orchestration.
//!
//! # Responsibilities
//! - Install the configuration into an engine
//! - Create one service per procedure set, broker and HTTP server
//! - Start them through the daemon and wait for shutdown
//!
//! # Design Decisions
//! - Fail fast: any install or startup error is fatal
//! - Services start in order: procedures, brokers, then HTTP sockets (traffic only when ready)
//! - Shutdown waits at most `daemon.stop_timeout_ms` after release begins

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::install::install;
use crate::config::schema::JerryConfig;
use crate::engine::Engine;
use crate::http::server::HttpSocket;
use crate::lifecycle::daemon::{Daemon, Service};
use crate::lifecycle::mailbox::StopHandle;
use crate::lifecycle::procedures::{ProcedureRegistry, ProcedureRunner};
use crate::lifecycle::state::{DaemonState, LifecycleError};
use crate::messaging::broker::{BrokerHandle, BrokerSocket};
use crate::plugin::registry::PluginRegistry;

/// A configured server: engine, sockets and the daemon driving them.
pub struct Jerry {
    engine: Arc<Engine>,
    daemon: Daemon,
    procedures: Arc<ProcedureRegistry>,
    brokers: BTreeMap<String, BrokerHandle>,
    http: BTreeMap<String, Arc<HttpSocket>>,
    stop_timeout: Duration,
}

impl Jerry {
    /// Install `config` and create every service it declares.
    pub fn from_config(config: &JerryConfig, plugins: &PluginRegistry) -> Result<Self, LifecycleError> {
        let engine = install(config, plugins)?.initialize()?;
        info!(
            contexts = engine.tree().len(),
            applications = engine.applications().count(),
            "Engine installed"
        );
        Self::new(Arc::new(engine), config)
    }

    /// Create the services of `config` around an existing engine.
    pub fn new(engine: Arc<Engine>, config: &JerryConfig) -> Result<Self, LifecycleError> {
        let mut services: Vec<Arc<dyn Service>> = Vec::new();

        let runner = Arc::new(ProcedureRunner::new(engine.clone()));
        let procedures = runner.registry().clone();
        services.push(runner);

        let mut brokers = BTreeMap::new();
        for broker in &config.brokers {
            let socket = Arc::new(BrokerSocket::new(broker, engine.clone()));
            brokers.insert(broker.id.clone(), socket.handle());
            services.push(socket);
        }

        let mut http = BTreeMap::new();
        for server in &config.http_servers {
            let socket = Arc::new(HttpSocket::new(server, engine.clone()));
            http.insert(server.id.clone(), socket.clone());
            services.push(socket);
        }

        Ok(Self {
            engine,
            daemon: Daemon::new(services)?,
            procedures,
            brokers,
            http,
            stop_timeout: Duration::from_millis(config.daemon.stop_timeout_ms),
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn start(&self) -> Result<(), LifecycleError> {
        self.daemon.start(|| info!("All services released"))
    }

    pub fn release(&self) -> Result<(), LifecycleError> {
        self.daemon.release()
    }

    /// Block until stopped or `timeout` elapses. Returns true if stopped.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.daemon.wait(timeout)
    }

    /// Handle for requesting a stop from another thread or a signal handler.
    pub fn stop_handle(&self) -> StopHandle {
        self.daemon.stop_handle()
    }

    pub fn state(&self) -> DaemonState {
        self.daemon.state()
    }

    pub fn broker(&self, id: &str) -> Option<&BrokerHandle> {
        self.brokers.get(id)
    }

    /// Bound address of an HTTP server once started.
    pub fn http_local_addr(&self, id: &str) -> Option<SocketAddr> {
        self.http.get(id).and_then(|socket| socket.local_addr())
    }

    pub fn procedures(&self) -> &Arc<ProcedureRegistry> {
        &self.procedures
    }

    /// Start, block until a stop is requested, then wait for services to drain.
    pub fn run_until_stopped(&self) -> Result<(), LifecycleError> {
        self.start()?;
        info!(services = self.daemon.services().len(), "Jerry running");
        self.daemon.wait_released();
        if self.daemon.wait(self.stop_timeout) {
            info!("Shutdown complete");
            Ok(())
        } else {
            warn!(
                timeout_ms = self.stop_timeout.as_millis() as u64,
                running = self.daemon.running_states(),
                "Services did not stop in time"
            );
            Err(LifecycleError::ShutdownTimeout(self.stop_timeout))
        }
    }
}

impl Drop for Jerry {
    fn drop(&mut self) {
        if self.daemon.state() == DaemonState::Started && self.daemon.release().is_ok() {
            self.daemon.wait(self.stop_timeout);
        }
    }
}
