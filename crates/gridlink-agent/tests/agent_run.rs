//! End-to-end run of the agent over the in-process transport.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use gridlink_agent::{AppConfig, Application};
use gridlink_bus::{DynTransport, MemoryTransport, Transport};
use gridlink_core::DeviceId;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

const AGGREGATOR_UUID: &str = "agg-1";
const EVENTS_CHANNEL: &str = "external-aggregator/sim-1/agg-1/events/all";
const BATCH_CHANNEL: &str = "external//aggregator/agg-1/batch_commands";

/// Answers CREATE / SELECT / BATCHED / DELETE like the simulation.
async fn spawn_responder(transport: Arc<MemoryTransport>) -> JoinHandle<()> {
    let mut stream = transport
        .psubscribe(vec![
            "crud_aggregator".to_string(),
            "*/aggregator".to_string(),
            "external//aggregator/*/batch_commands".to_string(),
        ])
        .await
        .unwrap();

    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            let body: Value = serde_json::from_slice(&message.payload).unwrap();
            let id = body["transaction_id"].clone();
            let replies = match body["type"].as_str() {
                Some("CREATE") => vec![(
                    "crud_aggregator_response".to_string(),
                    json!({"type": "CREATE", "status": "ready", "aggregator_uuid": AGGREGATOR_UUID, "transaction_id": id}),
                )],
                Some("DELETE") => vec![(
                    "crud_aggregator_response".to_string(),
                    json!({"type": "DELETE", "status": "deleted", "transaction_id": id}),
                )],
                Some("SELECT") => {
                    let device = body["device_uuid"].as_str().unwrap().to_string();
                    vec![
                        (
                            "crud_aggregator_response".to_string(),
                            json!({"status": "SELECTED", "device_uuid": device, "aggregator_uuid": AGGREGATOR_UUID}),
                        ),
                        (
                            format!("{device}/response/aggregator"),
                            json!({"status": "SELECTED", "device_uuid": device, "aggregator_uuid": AGGREGATOR_UUID, "transaction_id": id}),
                        ),
                    ]
                }
                Some("BATCHED") => vec![(
                    EVENTS_CHANNEL.to_string(),
                    json!({"event": "batch_response", "transaction_id": id, "responses": {}}),
                )],
                _ => Vec::new(),
            };
            for (channel, reply) in replies {
                transport.publish(channel, reply.to_string()).await.unwrap();
            }
        }
    })
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_agent_raises_fees_until_finish() {
    let transport = Arc::new(MemoryTransport::new());
    let responder = spawn_responder(transport.clone()).await;

    let mut config = AppConfig::default();
    config.devices = vec![DeviceId::from("house-1")];
    config.selection_timeout_ms = 1_000;
    config.aggregator = config
        .aggregator
        .with_timeouts(Duration::from_secs(1), Duration::from_secs(1));

    let app = Arc::new(Application::new(config));
    let run = {
        let app = app.clone();
        let transport: DynTransport = transport.clone();
        tokio::spawn(async move { app.run_with(transport).await })
    };

    eventually(|| !transport.published_on("house-1/response/aggregator").is_empty()).await;
    // Let the aggregator apply the selection notice.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let cycle = json!({"event": "market", "content": [{"area_uuid": "house-1"}, {"area_uuid": null}]});
    transport.inject(EVENTS_CHANNEL, cycle.to_string());
    eventually(|| !transport.published_on(BATCH_CHANNEL).is_empty()).await;

    let batch = transport.published_on(BATCH_CHANNEL)[0].json().unwrap();
    let commands = batch["batch_commands"]["house-1"].as_array().unwrap();
    assert_eq!(commands[0]["type"], "dso_market_stats");
    assert_eq!(commands[1]["type"], "grid_fees");
    assert_eq!(commands[1]["data"]["fee_const"], json!(1));
    assert!(commands[1]["data"]["fee_const"].is_u64());
    assert!(batch["batch_commands"].get("null").is_none());

    transport.inject(EVENTS_CHANNEL, json!({"event": "finish"}).to_string());
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(app.handler().is_finished());
    assert_eq!(app.handler().fee_const(), 1);
    let deletes: Vec<Value> = transport
        .published_on("crud_aggregator")
        .iter()
        .map(|m| m.json().unwrap())
        .filter(|body| body["type"] == "DELETE")
        .collect();
    assert_eq!(deletes.len(), 1);

    responder.abort();
}
