//! Unit tests for the gateway

use super::*;
use crate::correlation::CommandStatus;
use serde_json::{json, Value};

fn gateway() -> Gateway {
    Gateway::new(GatewayConfig::default(), Arc::new(CorrelationTable::new()))
}

#[test]
fn test_default_config() {
    let config = GatewayConfig::default();
    assert_eq!(config.client_timeout, Duration::from_secs(10));
    assert_eq!(config.sweep_interval, Duration::from_secs(2));
}

#[tokio::test]
async fn test_heartbeat_gets_pong() {
    let gateway = gateway();

    let batch = gateway.process_frame("c1", r#"{"operation":"heartbeat","data":"ping"}"#).await;

    assert_eq!(batch, vec![Envelope::pong()]);
    assert_eq!(gateway.client_status("c1").await, Some(ClientStatus::Connected));
    assert_eq!(gateway.clients().await, vec!["c1".to_string()]);
}

#[tokio::test]
async fn test_connect_emits_event() {
    let gateway = gateway();
    let mut events = gateway.subscribe();

    let batch = gateway.process_frame("c1", r#"{"operation":"connect","data":{}}"#).await;

    assert!(batch.is_empty());
    assert_eq!(events.recv().await.unwrap(), GatewayEvent::Connected("c1".to_string()));
}

#[tokio::test]
async fn test_results_are_forwarded_to_table() {
    let gateway = gateway();
    gateway.process_frame("c1", r#"{"operation":"connect","data":{}}"#).await;

    let command = Command::new("c1", "eval_js").with_arg("code", "1+1");
    let id = gateway.table().issue(command, &gateway).await.unwrap();

    let reply = json!({
        "operation": "eval_result",
        "data": format!(r#"{{"result":2,"id":"{}"}}"#, id),
    });
    gateway.process_frame("c1", &reply.to_string()).await;

    let entry = gateway.table().get(&id).await.unwrap();
    assert_eq!(entry.status, CommandStatus::Success);
    assert_eq!(entry.result.unwrap()["result"], json!(2));
}

#[tokio::test]
async fn test_queued_operations_follow_direct_response() {
    let gateway = gateway();
    gateway.process_frame("c1", r#"{"operation":"connect","data":{}}"#).await;

    let command = Command::new("c1", "load_plugin").with_arg("url", "http://x/p.js");
    let id = gateway.table().issue(command, &gateway).await.unwrap();
    assert_eq!(gateway.queued("c1").await, 1);

    let batch = gateway.process_frame("c1", r#"{"operation":"heartbeat","data":"ping"}"#).await;

    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0], Envelope::pong());
    assert_eq!(batch[1].operation, "load_plugin");
    assert_eq!(batch[1].data, json!({"url": "http://x/p.js", "id": id}));
    assert_eq!(gateway.queued("c1").await, 0);
}

#[tokio::test]
async fn test_publish_to_unknown_client_fails() {
    let gateway = gateway();
    let result = gateway.table().issue(Command::new("ghost", "eval_js"), &gateway).await;

    assert!(matches!(result, Err(BeaconError::UnknownClient(ref id)) if id == "ghost"));
    assert_eq!(gateway.table().latest().await.unwrap().status, CommandStatus::Error);
}

#[tokio::test]
async fn test_publish_uses_attached_socket() {
    let gateway = gateway();
    let (tx, mut rx) = mpsc::unbounded_channel();
    gateway.attach("c1", tx).await;

    let id = gateway.table().issue(Command::new("c1", "eval_js").with_arg("code", "1"), &gateway).await.unwrap();

    let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(frame, json!([{"operation": "eval_js", "data": {"code": "1", "id": id}}]));
    assert_eq!(gateway.queued("c1").await, 0);
}

#[tokio::test]
async fn test_publish_falls_back_to_queue_when_writer_gone() {
    let gateway = gateway();
    let (tx, rx) = mpsc::unbounded_channel();
    gateway.attach("c1", tx).await;
    drop(rx);

    gateway.table().issue(Command::new("c1", "eval_js"), &gateway).await.unwrap();
    assert_eq!(gateway.queued("c1").await, 1);
}

#[tokio::test]
async fn test_stale_detach_keeps_new_socket() {
    let gateway = gateway();
    let (old_tx, _old_rx) = mpsc::unbounded_channel();
    let (new_tx, mut new_rx) = mpsc::unbounded_channel();

    let old = gateway.attach("c1", old_tx).await;
    gateway.attach("c1", new_tx).await;
    gateway.detach("c1", old).await;

    gateway.table().issue(Command::new("c1", "eval_js"), &gateway).await.unwrap();
    assert!(new_rx.recv().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_marks_silent_clients() {
    let gateway = gateway();
    let mut events = gateway.subscribe();
    gateway.process_frame("c1", r#"{"operation":"heartbeat","data":"ping"}"#).await;

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(gateway.sweep(Instant::now()).await.is_empty());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(gateway.sweep(Instant::now()).await, vec!["c1".to_string()]);
    assert_eq!(gateway.client_status("c1").await, Some(ClientStatus::Disconnected));
    assert!(gateway.clients().await.is_empty());
    assert_eq!(events.recv().await.unwrap(), GatewayEvent::Disconnected("c1".to_string()));

    // Already disconnected clients are not reported again
    tokio::time::advance(Duration::from_secs(20)).await;
    assert!(gateway.sweep(Instant::now()).await.is_empty());

    // A heartbeat revives the client
    gateway.process_frame("c1", r#"{"operation":"heartbeat","data":"ping"}"#).await;
    assert_eq!(events.recv().await.unwrap(), GatewayEvent::Connected("c1".to_string()));
    assert_eq!(gateway.client_status("c1").await, Some(ClientStatus::Connected));
}

#[tokio::test]
async fn test_malformed_frames_get_no_reply() {
    let gateway = gateway();
    assert!(gateway.process_frame("c1", "not json").await.is_empty());
    assert!(gateway.process_frame("c1", r#"[{"data":1}]"#).await.is_empty());
}

#[tokio::test]
async fn test_batched_heartbeats() {
    let gateway = gateway();
    let batch = gateway
        .process_frame(
            "c1",
            r#"[{"operation":"heartbeat","data":"ping"},{"operation":"heartbeat","data":"ping"}]"#,
        )
        .await;
    assert_eq!(batch.len(), 2);
}

#[tokio::test]
async fn test_exchange_renders_reply_batch() {
    let gateway = gateway();

    assert_eq!(gateway.exchange("c1", r#"{"operation":"connect","data":{}}"#).await, "");

    let id = gateway.table().issue(Command::new("c1", "eval_js").with_arg("code", "1"), &gateway).await.unwrap();
    let reply: Value = serde_json::from_str(&gateway.exchange("c1", r#"{"operation":"heartbeat","data":"ping"}"#).await).unwrap();

    assert_eq!(reply, json!([
        {"operation": "heartbeat", "data": "pong"},
        {"operation": "eval_js", "data": {"code": "1", "id": id}}
    ]));
}
