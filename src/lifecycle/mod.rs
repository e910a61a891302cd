//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Install config → Initialize engine → Create services → Daemon::start
//!
//! Running (daemon.rs):
//!     Every service holds running states; the count reaches zero only when all have stopped
//!
//! Shutdown:
//!     signals.rs / StopHandle → mailbox.rs → Daemon::release
//!     → services release in reverse order → procedures.rs cancels procedures
//!     → last running state dropped → stopped → release callback
//! ```
//!
//! # Design Decisions
//! - Ordered startup: procedures, brokers, then HTTP sockets
//! - Ordered shutdown: reverse of startup
//! - Shutdown has a timeout; a procedure that ignores cancellation is reported, not killed

pub mod daemon;
pub mod mailbox;
pub mod procedures;
pub mod signals;
pub mod startup;
pub mod state;

pub use daemon::{Daemon, RunningState, Service};
pub use mailbox::StopHandle;
pub use procedures::{EntryKey, Procedure, ProcedureContext, ProcedureRegistry, ProcedureRunner};
pub use signals::install_signal_handlers;
pub use startup::Jerry;
pub use state::{DaemonState, LifecycleError};
