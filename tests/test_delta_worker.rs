//! Single-consumer ordering and shutdown


use shadowlink::service::DeltaWorker;
use shadowlink::testing::{MockExecutor, MockTransport};
use shadowlink::transport::InboundMessage;
use test_helpers::{handler_fixture, HandlerFixture, DELTA_TOPIC, REJECTED_TOPIC};
use tokio::sync::{mpsc, watch};

fn delta(method: &str) -> InboundMessage {
    InboundMessage::new(
        DELTA_TOPIC,
        format!(r#"{{"state":{{"method":"{method}"}}}}"#),
    )
}

#[tokio::test]
async fn test_deltas_applied_in_delivery_order() {
    let HandlerFixture {
        handler,
        executor,
        transport,
        ..
    } = handler_fixture(MockExecutor::new(), MockTransport::new());
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let methods = ["Player.PlayPause", "Player.Stop", "Application.SetMute", "Player.Open"];
    for method in methods {
        inbound_tx.send(delta(method)).unwrap();
    }
    drop(inbound_tx);

    let handled = DeltaWorker::new(handler, inbound_rx, shutdown_rx).run().await;
    assert_eq!(handled, methods.len() as u64);

    let executed: Vec<String> = executor
        .request_values()
        .await
        .iter()
        .map(|request| request["method"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(executed, methods);

    let reported: Vec<String> = transport
        .get_published_json()
        .await
        .iter()
        .map(|(_, payload)| {
            payload["state"]["reported"]["method"]
                .as_str()
                .unwrap_or_default()
                .to_string()
        })
        .collect();
    assert_eq!(reported, methods);
}

#[tokio::test]
async fn test_bad_messages_do_not_stop_the_worker() {
    let HandlerFixture {
        handler, transport, ..
    } = handler_fixture(MockExecutor::new(), MockTransport::new());
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    inbound_tx.send(InboundMessage::new(DELTA_TOPIC, "garbage")).unwrap();
    inbound_tx
        .send(InboundMessage::new(REJECTED_TOPIC, r#"{"code":409,"message":"Version conflict"}"#))
        .unwrap();
    inbound_tx.send(delta("Player.Stop")).unwrap();
    drop(inbound_tx);

    let handled = DeltaWorker::new(handler, inbound_rx, shutdown_rx).run().await;
    assert_eq!(handled, 3);
    assert_eq!(transport.get_published_messages().await.len(), 1);
}

#[tokio::test]
async fn test_shutdown_takes_priority_over_queue() {
    let HandlerFixture {
        handler, executor, ..
    } = handler_fixture(MockExecutor::new(), MockTransport::new());
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    inbound_tx.send(delta("Player.Stop")).unwrap();
    shutdown_tx.send(true).unwrap();

    let handled = DeltaWorker::new(handler, inbound_rx, shutdown_rx).run().await;
    assert_eq!(handled, 0);
    assert!(executor.requests().await.is_empty());
}

#[tokio::test]
async fn test_worker_stops_when_shutdown_sender_dropped() {
    let HandlerFixture { handler, .. } = handler_fixture(MockExecutor::new(), MockTransport::new());
    let (_inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundMessage>();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = tokio::spawn(DeltaWorker::new(handler, inbound_rx, shutdown_rx).run());
    drop(shutdown_tx);

    let handled = tokio::time::timeout(std::time::Duration::from_secs(5), worker)
        .await
        .expect("worker should stop")
        .unwrap();
    assert_eq!(handled, 0);
}
