//! Daemon state machine.
//!
//! # Responsibilities
//! - Guard the `stopped → started → stopping → stopped` transitions
//! - Count running states of every service and worker
//! - Fire the release callback exactly once when the count reaches zero
//!
//! # Design Decisions
//! - A running state is an RAII guard: dropping it is the only way to decrement
//! - Start holds its own guard so the count cannot hit zero mid-start
//! - Service starts and the release sweep never interleave; release reaches
//!   only services that were started in the current run
//! - Cancellation is cooperative; `wait` reports a timeout instead of forcing exit

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::lifecycle::mailbox::{spawn_mailbox, StopHandle};
use crate::lifecycle::state::{DaemonState, LifecycleError};
use crate::observability::metrics;

type ReleaseCallback = Box<dyn FnOnce() + Send>;

/// A socket, broker consumer or worker pool driven by the daemon.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// Start serving. The service keeps `running` (or forks of it) alive until
    /// it has fully stopped.
    fn start(&self, running: RunningState) -> Result<(), LifecycleError>;

    /// Ask the service to stop. Must not block on the shutdown itself.
    fn release(&self);
}

struct StateData {
    state: DaemonState,
    running_states: usize,
    on_released: Option<ReleaseCallback>,
}

struct Shared {
    data: Mutex<StateData>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, StateData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One unit of "still running". Dropping the last one stops the daemon.
pub struct RunningState {
    shared: Arc<Shared>,
}

impl RunningState {
    fn acquire(shared: &Arc<Shared>) -> Self {
        let mut data = shared.lock();
        data.running_states += 1;
        metrics::set_running_states(data.running_states);
        Self {
            shared: shared.clone(),
        }
    }

    /// Another running state for a worker of the same service.
    pub fn fork(&self) -> RunningState {
        RunningState::acquire(&self.shared)
    }
}

impl Drop for RunningState {
    fn drop(&mut self) {
        let callback = {
            let mut data = self.shared.lock();
            data.running_states = data.running_states.saturating_sub(1);
            metrics::set_running_states(data.running_states);
            if data.running_states == 0 && data.state != DaemonState::Stopped {
                data.state = DaemonState::Stopped;
                info!("Daemon stopped");
                data.on_released.take()
            } else {
                None
            }
        };
        self.shared.changed.notify_all();
        if let Some(callback) = callback {
            callback();
        }
    }
}

struct DaemonInner {
    shared: Arc<Shared>,
    services: Vec<Arc<dyn Service>>,
    /// Number of services started in the current run. Held across each
    /// service start and across the release sweep.
    started: Mutex<usize>,
}

impl DaemonInner {
    fn state(&self) -> DaemonState {
        self.shared.lock().state
    }

    fn lock_started(&self) -> MutexGuard<'_, usize> {
        self.started.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self, on_released: ReleaseCallback) -> Result<(), LifecycleError> {
        {
            let mut data = self.shared.lock();
            if data.state != DaemonState::Stopped {
                return Err(LifecycleError::InvalidState {
                    operation: "start",
                    state: data.state,
                });
            }
            data.state = DaemonState::Started;
            data.on_released = Some(on_released);
        }
        let startup = RunningState::acquire(&self.shared);
        info!(services = self.services.len(), "Daemon starting");

        for service in &self.services {
            let mut started = self.lock_started();
            if self.state() != DaemonState::Started {
                debug!(service = service.name(), "Release requested during startup");
                break;
            }
            let result = service.start(startup.fork());
            // A failed start may have spawned workers already; it gets released too.
            *started += 1;
            if let Err(e) = result {
                error!(service = service.name(), error = %e, "Service failed to start");
                drop(started);
                self.abort_start();
                return Err(e);
            }
            debug!(service = service.name(), "Service started");
        }
        drop(startup);
        Ok(())
    }

    fn abort_start(&self) {
        {
            let mut data = self.shared.lock();
            if data.state == DaemonState::Started {
                data.state = DaemonState::Stopping;
            }
        }
        self.shared.changed.notify_all();
        self.release_started();
    }

    /// Release, in reverse order, only the services started in this run.
    fn release_started(&self) {
        let mut started = self.lock_started();
        for service in self.services[..*started].iter().rev() {
            debug!(service = service.name(), "Releasing service");
            service.release();
        }
        *started = 0;
    }

    fn release(&self) -> Result<(), LifecycleError> {
        {
            let mut data = self.shared.lock();
            if data.state != DaemonState::Started {
                return Err(LifecycleError::InvalidState {
                    operation: "release",
                    state: data.state,
                });
            }
            data.state = DaemonState::Stopping;
        }
        self.shared.changed.notify_all();
        info!("Daemon releasing");
        self.release_started();
        Ok(())
    }
}

/// Lifecycle owner of a set of services.
pub struct Daemon {
    inner: Arc<DaemonInner>,
    stop: StopHandle,
}

impl Daemon {
    /// Create the daemon and its stop mailbox thread.
    pub fn new(services: Vec<Arc<dyn Service>>) -> Result<Self, LifecycleError> {
        let inner = Arc::new(DaemonInner {
            shared: Arc::new(Shared {
                data: Mutex::new(StateData {
                    state: DaemonState::Stopped,
                    running_states: 0,
                    on_released: None,
                }),
                changed: Condvar::new(),
            }),
            services,
            started: Mutex::new(0),
        });

        let weak: Weak<DaemonInner> = Arc::downgrade(&inner);
        let stop = spawn_mailbox("jerry-mailbox", move |token| {
            let Some(inner) = weak.upgrade() else { return };
            match inner.release() {
                Ok(()) => info!(token, "Stop signal handled"),
                Err(e) => debug!(token, error = %e, "Stop signal ignored"),
            }
        })
        .map_err(|source| LifecycleError::SocketStart {
            service: "mailbox".to_string(),
            source,
        })?;

        Ok(Self { inner, stop })
    }

    /// Start every service in order. Only valid while stopped.
    ///
    /// `on_released` runs once, on whichever thread drops the last running state.
    pub fn start<F>(&self, on_released: F) -> Result<(), LifecycleError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.start(Box::new(on_released))
    }

    /// Begin shutdown. Only valid while started.
    pub fn release(&self) -> Result<(), LifecycleError> {
        self.inner.release()
    }

    /// Post a stop request through the mailbox; safe from any thread.
    pub fn stop_signal(&self) -> u64 {
        self.stop.stop_signal()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Block until stopped or `timeout` elapses. Returns true if stopped.
    pub fn wait(&self, timeout: Duration) -> bool {
        let shared = &self.inner.shared;
        let data = shared.lock();
        let (data, _) = shared
            .changed
            .wait_timeout_while(data, timeout, |data| data.state != DaemonState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);
        data.state == DaemonState::Stopped
    }

    /// Block until stopped.
    pub fn wait_stopped(&self) {
        let shared = &self.inner.shared;
        let data = shared.lock();
        let _stopped = shared
            .changed
            .wait_while(data, |data| data.state != DaemonState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block while started. Returns once a release has begun, or right away
    /// if the daemon is not started.
    pub fn wait_released(&self) {
        let shared = &self.inner.shared;
        let data = shared.lock();
        let _released = shared
            .changed
            .wait_while(data, |data| data.state == DaemonState::Started)
            .unwrap_or_else(PoisonError::into_inner);
    }

    pub fn state(&self) -> DaemonState {
        self.inner.state()
    }

    pub fn running_states(&self) -> usize {
        self.inner.shared.lock().running_states
    }

    pub fn services(&self) -> &[Arc<dyn Service>] {
        &self.inner.services
    }
}
