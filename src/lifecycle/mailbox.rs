//! Stop-signal mailbox.
//!
//! Stop requests are posted as numbered tokens and handled on a dedicated
//! thread, so the caller (a signal thread, a request handler) never runs the
//! release sequence itself.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tracing::debug;

/// Cloneable handle that posts stop requests to the mailbox thread.
#[derive(Clone)]
pub struct StopHandle {
    sender: mpsc::UnboundedSender<u64>,
    tokens: Arc<AtomicU64>,
}

impl StopHandle {
    /// Post a stop request. Returns its token; never blocks.
    pub fn stop_signal(&self) -> u64 {
        let token = self.tokens.fetch_add(1, Ordering::Relaxed) + 1;
        if self.sender.send(token).is_err() {
            debug!(token, "Mailbox closed, stop signal dropped");
        }
        token
    }

    /// Number of stop requests posted so far.
    pub fn posted(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }
}

/// Spawn the mailbox thread. It runs until every [`StopHandle`] is dropped.
pub(crate) fn spawn_mailbox<F>(name: &str, mut on_token: F) -> io::Result<StopHandle>
where
    F: FnMut(u64) + Send + 'static,
{
    let (sender, mut receiver) = mpsc::unbounded_channel::<u64>();
    thread::Builder::new().name(name.to_string()).spawn(move || {
        while let Some(token) = receiver.blocking_recv() {
            on_token(token);
        }
        debug!("Mailbox thread exiting");
    })?;
    Ok(StopHandle {
        sender,
        tokens: Arc::new(AtomicU64::new(0)),
    })
}
