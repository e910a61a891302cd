//! In-memory message broker socket.
//!
//! # Responsibilities
//! - Accept published messages from any thread through a cloneable handle
//! - Feed them, in order, to the basic listeners of the configured applications
//!
//! # Design Decisions
//! - One consumer thread per broker; messages are delivered one at a time
//! - Messages published while the broker is stopped wait in the channel
//! - Release queues a shutdown marker, so messages published before it are still delivered

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::schema::BrokerConfig;
use crate::engine::Engine;
use crate::lifecycle::daemon::{RunningState, Service};
use crate::lifecycle::state::LifecycleError;
use crate::messaging::message::Message;

pub enum BrokerEvent {
    Message(Message),
    Shutdown,
}

/// Publishing side of a broker.
#[derive(Clone)]
pub struct BrokerHandle {
    id: Arc<str>,
    sender: mpsc::UnboundedSender<BrokerEvent>,
}

impl BrokerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn publish(&self, message: Message) -> Result<(), LifecycleError> {
        self.sender
            .send(BrokerEvent::Message(message))
            .map_err(|_| LifecycleError::BrokerClosed(self.id.to_string()))
    }
}

impl std::fmt::Debug for BrokerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerHandle").field("id", &self.id).finish()
    }
}

type Receiver = mpsc::UnboundedReceiver<BrokerEvent>;

/// Consumer slot. The receiver sits here while no consumer thread owns it.
struct ConsumerSlot {
    receiver: Option<Receiver>,
    running: bool,
}

/// Consumer side of a broker, driven by the daemon.
pub struct BrokerSocket {
    handle: BrokerHandle,
    applications: Arc<Vec<String>>,
    engine: Arc<Engine>,
    slot: Arc<Mutex<ConsumerSlot>>,
}

impl BrokerSocket {
    pub fn new(config: &BrokerConfig, engine: Arc<Engine>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            handle: BrokerHandle {
                id: Arc::from(config.id.as_str()),
                sender,
            },
            applications: Arc::new(config.applications.clone()),
            engine,
            slot: Arc::new(Mutex::new(ConsumerSlot {
                receiver: Some(receiver),
                running: false,
            })),
        }
    }

    pub fn handle(&self) -> BrokerHandle {
        self.handle.clone()
    }
}

fn lock(slot: &Mutex<ConsumerSlot>) -> MutexGuard<'_, ConsumerSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Service for BrokerSocket {
    fn name(&self) -> &str {
        self.handle.id()
    }

    fn start(&self, running: RunningState) -> Result<(), LifecycleError> {
        let mut consumer = lock(&self.slot);
        if consumer.running || consumer.receiver.is_none() {
            return Err(LifecycleError::AlreadyRunning(self.handle.id.to_string()));
        }

        let id = self.handle.id.clone();
        let engine = self.engine.clone();
        let applications = self.applications.clone();
        let slot = self.slot.clone();

        let spawned = thread::Builder::new()
            .name(format!("jerry-broker-{}", id))
            .spawn(move || {
                let Some(mut receiver) = lock(&slot).receiver.take() else {
                    return;
                };
                info!(broker = %id, "Broker consuming");
                while let Some(BrokerEvent::Message(message)) = receiver.blocking_recv() {
                    let delivery = engine.deliver(&applications, &message);
                    if delivery.consumed == 0 {
                        debug!(broker = %id, queue = %message.queue(), message_id = %message.id(), "Message not consumed");
                    }
                }
                {
                    let mut consumer = lock(&slot);
                    consumer.receiver = Some(receiver);
                    consumer.running = false;
                }
                info!(broker = %id, "Broker stopped");
                drop(running);
            });

        match spawned {
            Ok(_) => {
                consumer.running = true;
                Ok(())
            }
            Err(source) => Err(LifecycleError::SocketStart {
                service: self.handle.id.to_string(),
                source,
            }),
        }
    }

    /// Queue a shutdown marker behind pending messages. A no-op while no
    /// consumer is running, so no marker outlives a run.
    fn release(&self) {
        let consumer = lock(&self.slot);
        if consumer.running {
            let _ = self.handle.sender.send(BrokerEvent::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::daemon::Daemon;
    use crate::lifecycle::state::DaemonState;
    use crate::plugin::builtin::CollectHandler;
    use std::sync::mpsc as std_mpsc;
    use std::time::{Duration, Instant};

    fn engine_with_sink() -> (Arc<Engine>, Arc<CollectHandler>) {
        let sink = Arc::new(CollectHandler::new());
        let mut builder = Engine::builder();
        builder.add_application("app", None).unwrap();
        let listener = builder.add_basic_listener("app").unwrap();
        let queue = builder.tree().add_queue(listener, "orders");
        builder.tree().add_message_handler_object(queue, sink.clone()).unwrap();
        (Arc::new(builder.initialize().unwrap()), sink)
    }

    fn wait_for(sink: &CollectHandler, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if sink.messages().len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_publish_before_start_is_delivered() {
        let (engine, sink) = engine_with_sink();
        let broker = Arc::new(BrokerSocket::new(
            &BrokerConfig {
                id: "bus".into(),
                applications: vec!["app".into()],
            },
            engine,
        ));
        let handle = broker.handle();
        handle.publish(Message::new("orders", "early")).unwrap();

        let daemon = Daemon::new(vec![broker.clone() as Arc<dyn Service>]).unwrap();
        daemon.start(|| {}).unwrap();
        handle.publish(Message::new("orders", "late")).unwrap();
        assert!(wait_for(&sink, 2));

        daemon.release().unwrap();
        assert!(daemon.wait(Duration::from_secs(5)));

        // The receiver is back in place, so the broker can run again.
        daemon.start(|| {}).unwrap();
        handle.publish(Message::new("orders", "again")).unwrap();
        assert!(wait_for(&sink, 3));
        daemon.release().unwrap();
        assert!(daemon.wait(Duration::from_secs(5)));
    }

    fn broker(engine: Arc<Engine>) -> Arc<BrokerSocket> {
        Arc::new(BrokerSocket::new(
            &BrokerConfig {
                id: "bus".into(),
                applications: vec!["app".into()],
            },
            engine,
        ))
    }

    #[test]
    fn test_release_while_stopped_is_ignored() {
        let (engine, sink) = engine_with_sink();
        let broker = broker(engine);
        broker.release();

        let daemon = Daemon::new(vec![broker.clone() as Arc<dyn Service>]).unwrap();
        daemon.start(|| {}).unwrap();
        broker.handle().publish(Message::new("orders", "after")).unwrap();
        assert!(wait_for(&sink, 1));
        assert_eq!(daemon.state(), DaemonState::Started);

        daemon.release().unwrap();
        assert!(daemon.wait(Duration::from_secs(5)));
    }

    /// Service ahead of the broker whose first start waits for a release.
    struct SlowStart {
        entered: Mutex<Option<std_mpsc::Sender<()>>>,
        resume: Mutex<std_mpsc::Receiver<()>>,
    }

    impl Service for SlowStart {
        fn name(&self) -> &str {
            "slow-start"
        }

        fn start(&self, _running: RunningState) -> Result<(), LifecycleError> {
            if let Some(entered) = self.entered.lock().unwrap().take() {
                let _ = entered.send(());
                let _ = self.resume.lock().unwrap().recv();
            }
            Ok(())
        }

        fn release(&self) {}
    }

    #[test]
    fn test_restart_after_release_during_startup() {
        let (engine, sink) = engine_with_sink();
        let broker = broker(engine);
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (resume_tx, resume_rx) = std_mpsc::channel();
        let slow = Arc::new(SlowStart {
            entered: Mutex::new(Some(entered_tx)),
            resume: Mutex::new(resume_rx),
        });
        let daemon = Daemon::new(vec![slow as Arc<dyn Service>, broker.clone()]).unwrap();

        thread::scope(|scope| {
            let starter = scope.spawn(|| daemon.start(|| {}));
            entered_rx.recv().unwrap();
            let releaser = scope.spawn(|| daemon.release());
            while daemon.state() != DaemonState::Stopping {
                thread::sleep(Duration::from_millis(1));
            }
            resume_tx.send(()).unwrap();
            starter.join().unwrap().unwrap();
            releaser.join().unwrap().unwrap();
        });
        assert!(daemon.wait(Duration::from_secs(5)));

        daemon.start(|| {}).unwrap();
        broker.handle().publish(Message::new("orders", "after restart")).unwrap();
        assert!(wait_for(&sink, 1));
        assert_eq!(daemon.state(), DaemonState::Started);

        daemon.release().unwrap();
        assert!(daemon.wait(Duration::from_secs(5)));
    }

    #[test]
    fn test_publish_after_drop_fails() {
        let (engine, _sink) = engine_with_sink();
        let broker = BrokerSocket::new(
            &BrokerConfig {
                id: "bus".into(),
                applications: vec!["app".into()],
            },
            engine,
        );
        let handle = broker.handle();
        drop(broker);
        assert!(matches!(
            handle.publish(Message::new("orders", "x")),
            Err(LifecycleError::BrokerClosed(_))
        ));
    }
}
