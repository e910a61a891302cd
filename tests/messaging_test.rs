//! Broker → basic listener delivery through running services.

use std::time::Duration;

use jerry::messaging::Message;
use jerry::plugin::builtin::CollectHandler;
use jerry::LifecycleError;

mod common;

const BUS: &str = r#"
    [[applications]]
    name = "orders"

    [applications.basic_listener]

    [[applications.basic_listener.entries]]
    kind = "queue"
    queue = "created"
    [[applications.basic_listener.entries.entries]]
    kind = "message-handler"
    id = "audit"
    implementation = "jerry/builtin/basic/collect"

    [[applications.basic_listener.entries]]
    kind = "queue"
    queue = "created"
    [[applications.basic_listener.entries.entries]]
    kind = "message-handler"
    implementation = "jerry/builtin/basic/log"
    settings = { consume = false }
    [[applications.basic_listener.entries.entries]]
    kind = "message-handler"
    id = "billing"
    implementation = "jerry/builtin/basic/collect"
    [[applications.basic_listener.entries.entries]]
    kind = "message-handler"
    id = "never"
    implementation = "jerry/builtin/basic/collect"

    [[brokers]]
    id = "bus"
    applications = ["orders"]
"#;

fn sink<'a>(jerry: &'a jerry::Jerry, registration: usize, id: &str) -> &'a CollectHandler {
    let engine = jerry.engine();
    let listener = engine.application("orders").unwrap().basic_listener().unwrap();
    let queue = listener.registrations("created")[registration];
    engine.tree().find_object_as::<CollectHandler>(queue, id).unwrap()
}

#[tokio::test]
async fn test_fan_out_across_registrations() {
    let jerry = common::start(BUS);
    let bus = jerry.broker("bus").unwrap().clone();

    bus.publish(Message::new("created", "order-1").with_header("tenant", "acme"))
        .unwrap();
    bus.publish(Message::new("created", "order-2")).unwrap();

    let audit = sink(&jerry, 0, "audit");
    let billing = sink(&jerry, 1, "billing");
    let never = sink(&jerry, 1, "never");

    assert!(common::eventually(Duration::from_secs(5), || audit.messages().len() == 2).await);
    assert!(common::eventually(Duration::from_secs(5), || billing.messages().len() == 2).await);
    // First match wins inside one registration.
    assert!(never.messages().is_empty());

    let first = &audit.messages()[0];
    assert_eq!(first.payload_str(), Some("order-1"));
    assert_eq!(first.header("tenant"), Some("acme"));

    common::stop(&jerry);
}

#[tokio::test]
async fn test_unknown_queue_is_not_consumed() {
    let jerry = common::start(BUS);
    let bus = jerry.broker("bus").unwrap().clone();
    bus.publish(Message::new("deleted", "x")).unwrap();
    bus.publish(Message::new("created", "y")).unwrap();

    let audit = sink(&jerry, 0, "audit");
    assert!(common::eventually(Duration::from_secs(5), || audit.messages().len() == 1).await);
    assert_eq!(audit.messages()[0].payload_str(), Some("y"));

    common::stop(&jerry);
}

#[tokio::test]
async fn test_publish_after_shutdown_is_queued_until_restart() {
    let jerry = common::start(BUS);
    let bus = jerry.broker("bus").unwrap().clone();
    common::stop(&jerry);

    bus.publish(Message::new("created", "late")).unwrap();
    let audit = sink(&jerry, 0, "audit");
    assert!(audit.messages().is_empty());

    jerry.start().unwrap();
    assert!(common::eventually(Duration::from_secs(5), || audit.messages().len() == 1).await);
    common::stop(&jerry);

    drop(jerry);
    assert!(matches!(
        bus.publish(Message::new("created", "gone")),
        Err(LifecycleError::BrokerClosed(_))
    ));
}
