//! Daemon states and lifecycle errors.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::error::EngineError;

/// `Stopped → Started → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Stopped,
    Started,
    Stopping,
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DaemonState::Stopped => "stopped",
            DaemonState::Started => "started",
            DaemonState::Stopping => "stopping",
        })
    }
}

/// Errors of the daemon state machine and its services.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A transition was requested from a state that does not allow it.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: DaemonState,
    },

    /// A socket or worker could not be started.
    #[error("service '{service}' failed to start: {source}")]
    SocketStart {
        service: String,
        #[source]
        source: io::Error,
    },

    /// A service was started while its previous run is still active.
    #[error("service '{0}' is already running")]
    AlreadyRunning(String),

    /// A message was published to a broker whose socket is gone.
    #[error("broker '{0}' is closed")]
    BrokerClosed(String),

    /// The daemon did not reach `stopped` within the configured timeout.
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
