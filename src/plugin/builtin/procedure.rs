//! Built-in procedures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::context::object::Object;
use crate::error::{HandlerError, PluginError};
use crate::lifecycle::procedures::{Procedure, ProcedureContext};
use crate::plugin::registry::Settings;

/// Counts ticks until cancelled.
///
/// Settings: `interval-ms` (1000).
pub struct TickerProcedure {
    interval: Duration,
    ticks: AtomicU64,
}

impl TickerProcedure {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, PluginError> {
        let interval = settings.parse::<u64>("interval-ms")?.unwrap_or(1000);
        Ok(Self::new(Duration::from_millis(interval)))
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl Object for TickerProcedure {
    fn as_procedure(self: Arc<Self>) -> Option<Arc<dyn Procedure>> {
        Some(self)
    }
}

impl Procedure for TickerProcedure {
    fn procedure_run(&self, context: &ProcedureContext<'_>) -> Result<(), HandlerError> {
        while !context.is_cancelled() {
            let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(procedure = %context.key(), worker = context.worker(), tick, "Tick");
            if context.wait_cancelled(self.interval) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::builder::ContextTreeBuilder;
    use crate::lifecycle::procedures::{EntryKey, ProcedureRegistry};
    use std::thread;

    #[test]
    fn test_ticks_until_cancelled() {
        let tree = ContextTreeBuilder::new().initialize().unwrap();
        let registry = Arc::new(ProcedureRegistry::new());
        let ticker = Arc::new(TickerProcedure::new(Duration::from_millis(5)));
        let key = EntryKey {
            context: tree.root(),
            index: 0,
        };

        let handle = {
            let registry = registry.clone();
            let procedure: Arc<dyn Procedure> = ticker.clone();
            thread::spawn(move || {
                let context = ProcedureContext::new(&tree, key, 0, &registry);
                registry.run(key, &procedure, &context).unwrap()
            })
        };

        while ticker.ticks() < 2 {
            thread::sleep(Duration::from_millis(1));
        }
        registry.cancel();
        assert!(handle.join().unwrap());
        assert!(registry.is_drained());
    }

    #[test]
    fn test_interval_setting() {
        assert!(TickerProcedure::from_settings(&Settings::new().with("interval-ms", "fast")).is_err());
        let ticker = TickerProcedure::from_settings(&Settings::new().with("interval-ms", "25")).unwrap();
        assert_eq!(ticker.interval, Duration::from_millis(25));
    }
}
