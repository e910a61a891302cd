//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Sockets, listeners, procedures:
//!     → tracing events with request_id / message_id / queue fields
//!     → logging.rs (EnvFilter, pretty or JSON to stdout)
//!
//! Dispatch and daemon counters:
//!     → metrics.rs (jerry_* counters and the running-states gauge)
//!     → Prometheus exporter when observability.metrics_enabled
//! ```
//!
//! # Design Decisions
//! - Both are installed once by the binary; library code only emits
//! - Without an installed recorder, metric calls are no-ops

pub mod logging;
pub mod metrics;
