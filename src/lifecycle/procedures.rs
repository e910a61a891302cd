//! Background procedures and their running-count bookkeeping.
//!
//! # Responsibilities
//! - Count concurrent runs per procedure entry
//! - Broadcast cooperative cancellation to every running entry
//! - Run each procedure entry on its own worker threads while the daemon is started
//!
//! # Design Decisions
//! - Counts are decremented by a guard, so they never go negative
//! - Cancellation never interrupts: a procedure that ignores it blocks shutdown
//!   until the configured stop timeout expires
//! - `procedure_cancel` is called outside the registry lock

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::context::node::ContextId;
use crate::context::object::{downcast_object, Object};
use crate::context::tree::ContextTree;
use crate::engine::Engine;
use crate::error::HandlerError;
use crate::lifecycle::daemon::{RunningState, Service};
use crate::lifecycle::state::LifecycleError;
use crate::observability::metrics;

/// A cancelable unit of background work.
pub trait Procedure: Send + Sync {
    /// Do the work. Long-running implementations must return promptly once
    /// `context.is_cancelled()` turns true.
    fn procedure_run(&self, context: &ProcedureContext<'_>) -> Result<(), HandlerError>;

    /// Hook to interrupt blocking work when cancellation is requested.
    fn procedure_cancel(&self) {}
}

/// Identity of a procedure entry: its context and position in the entry list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub context: ContextId,
    pub index: usize,
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.context, self.index)
    }
}

/// What a running procedure sees of the engine.
pub struct ProcedureContext<'a> {
    tree: &'a ContextTree,
    key: EntryKey,
    worker: usize,
    registry: &'a ProcedureRegistry,
}

impl<'a> ProcedureContext<'a> {
    pub fn new(tree: &'a ContextTree, key: EntryKey, worker: usize, registry: &'a ProcedureRegistry) -> Self {
        Self {
            tree,
            key,
            worker,
            registry,
        }
    }

    pub fn key(&self) -> EntryKey {
        self.key
    }

    /// Worker index, `0..threads`.
    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn tree(&self) -> &'a ContextTree {
        self.tree
    }

    pub fn find_object(&self, id: &str) -> Option<&'a Arc<dyn Object>> {
        self.tree.find_object(self.key.context, id)
    }

    pub fn find_object_as<T: Object>(&self, id: &str) -> Option<&'a T> {
        self.find_object(id).and_then(downcast_object::<T>)
    }

    pub fn is_cancelled(&self) -> bool {
        self.registry.is_cancelled()
    }

    /// Sleep for `timeout` or until cancelled. Returns true if cancelled.
    pub fn wait_cancelled(&self, timeout: Duration) -> bool {
        self.registry.wait_cancelled(timeout)
    }
}

#[derive(Default)]
struct RegistryState {
    running: HashMap<EntryKey, (usize, Arc<dyn Procedure>)>,
    cancel: bool,
}

/// Running-procedure map and cancel flag.
#[derive(Default)]
pub struct ProcedureRegistry {
    state: Mutex<RegistryState>,
    changed: Condvar,
}

struct RunGuard<'a> {
    registry: &'a ProcedureRegistry,
    key: EntryKey,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.registry.lock();
        if let Some((count, _)) = state.running.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                state.running.remove(&self.key);
            }
        }
        drop(state);
        self.registry.changed.notify_all();
    }
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `procedure` for `key`, counting the invocation while it runs.
    ///
    /// Returns `Ok(false)` without running when cancellation is in progress.
    pub fn run(
        &self,
        key: EntryKey,
        procedure: &Arc<dyn Procedure>,
        context: &ProcedureContext<'_>,
    ) -> Result<bool, HandlerError> {
        {
            let mut state = self.lock();
            if state.cancel {
                return Ok(false);
            }
            state
                .running
                .entry(key)
                .or_insert_with(|| (0, procedure.clone()))
                .0 += 1;
        }
        let _guard = RunGuard { registry: self, key };

        match panic::catch_unwind(AssertUnwindSafe(|| procedure.procedure_run(context))) {
            Ok(result) => result.map(|()| true),
            Err(_) => Err(HandlerError::Failed(format!("procedure {} panicked", key))),
        }
    }

    /// Set the cancel flag and ask every running entry to stop.
    pub fn cancel(&self) {
        let running: Vec<Arc<dyn Procedure>> = {
            let mut state = self.lock();
            state.cancel = true;
            state.running.values().map(|(_, procedure)| procedure.clone()).collect()
        };
        self.changed.notify_all();
        debug!(running = running.len(), "Cancelling procedures");
        for procedure in running {
            procedure.procedure_cancel();
        }
    }

    /// Clear the cancel flag before a new start.
    pub fn reset(&self) {
        self.lock().cancel = false;
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancel
    }

    pub fn running_count(&self, key: EntryKey) -> usize {
        self.lock().running.get(&key).map(|(count, _)| *count).unwrap_or(0)
    }

    pub fn total_running(&self) -> usize {
        self.lock().running.values().map(|(count, _)| count).sum()
    }

    /// Cancellation requested and every run has returned.
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.cancel && state.running.is_empty()
    }

    /// Block until no run is active or `timeout` elapses. Returns true if drained.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |state| !state.running.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        state.running.is_empty()
    }

    fn wait_cancelled(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |state| !state.cancel)
            .unwrap_or_else(PoisonError::into_inner);
        state.cancel
    }
}

/// Runs every procedure entry of the engine while the daemon is started.
pub struct ProcedureRunner {
    engine: Arc<Engine>,
    registry: Arc<ProcedureRegistry>,
}

impl ProcedureRunner {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            registry: Arc::new(ProcedureRegistry::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ProcedureRegistry> {
        &self.registry
    }
}

impl Service for ProcedureRunner {
    fn name(&self) -> &str {
        "procedures"
    }

    fn start(&self, running: RunningState) -> Result<(), LifecycleError> {
        self.registry.reset();
        for (key, entry) in self.engine.procedures() {
            for worker in 0..entry.threads {
                let engine = self.engine.clone();
                let registry = self.registry.clone();
                let procedure = entry.procedure.clone();
                let guard = running.fork();
                thread::Builder::new()
                    .name(format!("jerry-proc-{}-{}", key, worker))
                    .spawn(move || {
                        let context = ProcedureContext::new(engine.tree(), key, worker, &registry);
                        match registry.run(key, &procedure, &context) {
                            Ok(true) => debug!(procedure = %key, worker, "Procedure finished"),
                            Ok(false) => debug!(procedure = %key, worker, "Procedure skipped, cancellation in progress"),
                            Err(e) => {
                                warn!(procedure = %key, worker, error = %e, "Procedure failed");
                                metrics::record_handler_error("procedure");
                            }
                        }
                        drop(guard);
                    })
                    .map_err(|source| LifecycleError::SocketStart {
                        service: format!("procedure {}", key),
                        source,
                    })?;
            }
            info!(procedure = %key, threads = entry.threads, "Procedure started");
        }
        Ok(())
    }

    fn release(&self) {
        self.registry.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::builder::ContextTreeBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    /// Blocks on a barrier pair so the test controls when runs overlap and end.
    struct Gate {
        entered: Barrier,
        release: Barrier,
        cancels: AtomicUsize,
    }

    impl Procedure for Gate {
        fn procedure_run(&self, _context: &ProcedureContext<'_>) -> Result<(), HandlerError> {
            self.entered.wait();
            self.release.wait();
            Ok(())
        }

        fn procedure_cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn empty_tree() -> ContextTree {
        ContextTreeBuilder::new().initialize().unwrap()
    }

    #[test]
    fn test_concurrent_runs_counted() {
        let tree = Arc::new(empty_tree());
        let registry = Arc::new(ProcedureRegistry::new());
        let gate = Arc::new(Gate {
            entered: Barrier::new(3),
            release: Barrier::new(3),
            cancels: AtomicUsize::new(0),
        });
        let procedure: Arc<dyn Procedure> = gate.clone();
        let key = EntryKey {
            context: tree.root(),
            index: 0,
        };

        let workers: Vec<_> = (0..2)
            .map(|worker| {
                let tree = tree.clone();
                let registry = registry.clone();
                let procedure = procedure.clone();
                thread::spawn(move || {
                    let context = ProcedureContext::new(&tree, key, worker, &registry);
                    registry.run(key, &procedure, &context).unwrap()
                })
            })
            .collect();

        gate.entered.wait();
        assert_eq!(registry.running_count(key), 2);

        // Cancel concurrently with the running invocations.
        let canceller = {
            let registry = registry.clone();
            thread::spawn(move || registry.cancel())
        };
        canceller.join().unwrap();
        assert_eq!(gate.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(registry.running_count(key), 2);
        assert!(!registry.is_drained());

        gate.release.wait();
        for worker in workers {
            assert!(worker.join().unwrap());
        }
        assert_eq!(registry.running_count(key), 0);
        assert!(registry.is_drained());
        assert!(registry.wait_drained(Duration::ZERO));
    }

    struct Counting(AtomicUsize);

    impl Procedure for Counting {
        fn procedure_run(&self, _context: &ProcedureContext<'_>) -> Result<(), HandlerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_run_skipped_after_cancel() {
        let tree = empty_tree();
        let registry = ProcedureRegistry::new();
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let procedure: Arc<dyn Procedure> = counting.clone();
        let key = EntryKey {
            context: tree.root(),
            index: 0,
        };
        let context = ProcedureContext::new(&tree, key, 0, &registry);

        registry.cancel();
        assert!(!registry.run(key, &procedure, &context).unwrap());
        assert_eq!(counting.0.load(Ordering::SeqCst), 0);

        registry.reset();
        assert!(registry.run(key, &procedure, &context).unwrap());
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
        assert_eq!(registry.total_running(), 0);
    }

    struct Panicking;

    impl Procedure for Panicking {
        fn procedure_run(&self, _context: &ProcedureContext<'_>) -> Result<(), HandlerError> {
            panic!("procedure bug");
        }
    }

    #[test]
    fn test_panic_still_decrements() {
        let tree = empty_tree();
        let registry = ProcedureRegistry::new();
        let procedure: Arc<dyn Procedure> = Arc::new(Panicking);
        let key = EntryKey {
            context: tree.root(),
            index: 3,
        };
        let context = ProcedureContext::new(&tree, key, 0, &registry);

        assert!(registry.run(key, &procedure, &context).is_err());
        assert_eq!(registry.running_count(key), 0);
    }

    #[test]
    fn test_wait_cancelled() {
        let tree = empty_tree();
        let registry = Arc::new(ProcedureRegistry::new());
        let key = EntryKey {
            context: tree.root(),
            index: 0,
        };
        let context = ProcedureContext::new(&tree, key, 0, &registry);
        assert!(!context.wait_cancelled(Duration::from_millis(10)));

        let canceller = {
            let registry = registry.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                registry.cancel();
            })
        };
        assert!(context.wait_cancelled(Duration::from_secs(5)));
        canceller.join().unwrap();
    }
}
