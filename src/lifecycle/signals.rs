//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGTERM and SIGINT handlers
//! - Translate the first signal into a stop request on the daemon mailbox
//!
//! # Design Decisions
//! - Signals are read on a dedicated thread; nothing runs in signal context
//! - A second SIGTERM/SIGINT forces exit without waiting for services to drain

use std::io;
use std::thread;

use tracing::{info, warn};

use crate::lifecycle::mailbox::StopHandle;

/// Exit code used when a second signal forces shutdown.
pub const FORCED_EXIT_CODE: i32 = 130;

#[cfg(unix)]
pub fn install_signal_handlers(stop: StopHandle) -> io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGTERM, SIGINT])?;
    thread::Builder::new()
        .name("jerry-signals".to_string())
        .spawn(move || {
            let mut received = 0u32;
            for signal in signals.forever() {
                received += 1;
                on_signal(&stop, signal, received);
            }
        })?;
    Ok(())
}

#[cfg(not(unix))]
pub fn install_signal_handlers(stop: StopHandle) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    thread::Builder::new()
        .name("jerry-signals".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let mut received = 0u32;
                while tokio::signal::ctrl_c().await.is_ok() {
                    received += 1;
                    on_signal(&stop, 2, received);
                }
            })
        })?;
    Ok(())
}

fn on_signal(stop: &StopHandle, signal: i32, received: u32) {
    if received == 1 {
        let token = stop.stop_signal();
        info!(signal, token, "Shutdown signal received");
    } else {
        warn!(signal, "Second shutdown signal, forcing exit");
        std::process::exit(FORCED_EXIT_CODE);
    }
}
