//! Shared fixtures for gridlink-client integration tests.
//!
//! - [`MockSimulation`]: answers CREATE / DELETE / SELECT / UNSELECT /
//!   BATCHED the way the simulation server does
//! - [`RecordingHandler`]: forwards every callback to a channel

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use gridlink_bus::{
    BoxFuture, BusResult, EventPayload, MarketCycle, MemoryTransport, MessageStream,
    SelectionNotice, Transport,
};
use gridlink_client::{AggregatorConfig, AggregatorHandler, AggregatorSession};
use gridlink_core::AggregatorHandle;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const SIMULATION_ID: &str = "sim-1";
pub const AGGREGATOR_UUID: &str = "agg-uuid-1";

// ============================================================================
// MockSimulation
// ============================================================================

pub struct MockSimulation {
    transport: Arc<MemoryTransport>,
    responding: Arc<AtomicBool>,
    include_uuid: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MockSimulation {
    pub async fn start(transport: Arc<MemoryTransport>) -> Self {
        let mut stream = transport
            .psubscribe(vec![
                "crud_aggregator".to_string(),
                "*/aggregator".to_string(),
                "external//aggregator/*/batch_commands".to_string(),
            ])
            .await
            .unwrap();

        let responding = Arc::new(AtomicBool::new(true));
        let include_uuid = Arc::new(AtomicBool::new(true));

        let task = {
            let transport = transport.clone();
            let responding = responding.clone();
            let include_uuid = include_uuid.clone();
            tokio::spawn(async move {
                while let Some(message) = stream.next().await {
                    if !responding.load(Ordering::SeqCst) {
                        continue;
                    }
                    let Ok(body) = serde_json::from_slice::<Value>(&message.payload) else {
                        continue;
                    };
                    for (channel, reply) in replies(&body, include_uuid.load(Ordering::SeqCst)) {
                        transport.publish(channel, reply.to_string()).await.unwrap();
                    }
                }
            })
        };

        Self {
            transport,
            responding,
            include_uuid,
            task,
        }
    }

    /// Stop (or resume) answering commands.
    pub fn set_responding(&self, responding: bool) {
        self.responding.store(responding, Ordering::SeqCst);
    }

    /// Answer CREATE without `aggregator_uuid`.
    pub fn omit_aggregator_uuid(&self) {
        self.include_uuid.store(false, Ordering::SeqCst);
    }

    pub fn events_channel(&self, aggregator: &AggregatorHandle) -> String {
        format!("external-aggregator/{SIMULATION_ID}/{aggregator}/events/all")
    }

    pub async fn market_cycle(&self, aggregator: &AggregatorHandle, areas: &[&str]) {
        let content: Vec<Value> = areas
            .iter()
            .map(|area| json!({"area_uuid": area, "market_slot": "2026-10-19T12:00"}))
            .collect();
        self.publish_event(aggregator, json!({"event": "market", "content": content}))
            .await;
    }

    pub async fn finish(&self, aggregator: &AggregatorHandle) {
        self.publish_event(aggregator, json!({"event": "finish"})).await;
    }

    pub async fn publish_event(&self, aggregator: &AggregatorHandle, body: Value) {
        self.transport
            .publish(self.events_channel(aggregator), body.to_string())
            .await
            .unwrap();
    }
}

impl Drop for MockSimulation {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn replies(body: &Value, include_uuid: bool) -> Vec<(String, Value)> {
    let transaction_id = body["transaction_id"].clone();
    match body["type"].as_str() {
        Some("CREATE") => {
            let mut reply = json!({
                "type": "CREATE",
                "status": "ready",
                "name": body["name"],
                "transaction_id": transaction_id,
            });
            if include_uuid {
                reply["aggregator_uuid"] = json!(AGGREGATOR_UUID);
            }
            vec![("crud_aggregator_response".to_string(), reply)]
        }
        Some("DELETE") => vec![(
            "crud_aggregator_response".to_string(),
            json!({
                "type": "DELETE",
                "status": "deleted",
                "aggregator_uuid": body["aggregator_uuid"],
                "transaction_id": transaction_id,
            }),
        )],
        Some(command @ ("SELECT" | "UNSELECT")) => {
            let status = if command == "SELECT" { "SELECTED" } else { "UNSELECTED" };
            let device = body["device_uuid"].as_str().unwrap_or_default().to_string();
            vec![
                (
                    format!("{device}/response/aggregator"),
                    json!({
                        "status": status,
                        "device_uuid": device,
                        "aggregator_uuid": body["aggregator_uuid"],
                        "transaction_id": transaction_id,
                    }),
                ),
                (
                    "crud_aggregator_response".to_string(),
                    json!({
                        "status": status,
                        "device_uuid": device,
                        "aggregator_uuid": body["aggregator_uuid"],
                    }),
                ),
            ]
        }
        Some("BATCHED") => {
            let aggregator = body["aggregator_uuid"].as_str().unwrap_or_default();
            let responses: serde_json::Map<String, Value> = body["batch_commands"]
                .as_object()
                .map(|commands| {
                    commands
                        .keys()
                        .map(|device| (device.clone(), json!({"status": "ready"})))
                        .collect()
                })
                .unwrap_or_default();
            vec![(
                format!("external-aggregator/{SIMULATION_ID}/{aggregator}/events/all"),
                json!({
                    "event": "batch_response",
                    "transaction_id": transaction_id,
                    "responses": responses,
                }),
            )]
        }
        _ => Vec::new(),
    }
}

// ============================================================================
// EndingTransport
// ============================================================================

/// Wraps a [`MemoryTransport`]; every subscription ends after `limit`
/// messages, like a pub/sub connection dropped by the server.
pub struct EndingTransport {
    inner: Arc<MemoryTransport>,
    limit: usize,
}

impl EndingTransport {
    pub fn new(inner: Arc<MemoryTransport>, limit: usize) -> Self {
        Self { inner, limit }
    }
}

impl Transport for EndingTransport {
    fn publish(&self, channel: String, payload: String) -> BoxFuture<'_, BusResult<()>> {
        self.inner.publish(channel, payload)
    }

    fn psubscribe(&self, patterns: Vec<String>) -> BoxFuture<'_, BusResult<MessageStream>> {
        Box::pin(async move {
            let stream = self.inner.psubscribe(patterns).await?;
            Ok(stream.take(self.limit).boxed())
        })
    }

    fn name(&self) -> &'static str {
        "ending"
    }
}

// ============================================================================
// RecordingHandler
// ============================================================================

#[derive(Debug)]
pub struct Recorded {
    pub callback: &'static str,
    pub thread: Option<String>,
    pub sequence: usize,
    pub body: Value,
}

/// Forwards callbacks to a channel. The first market cycle can be delayed.
pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<Recorded>,
    market_calls: AtomicUsize,
    slow_first_market: Option<Duration>,
    fail_market: bool,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Recorded>) {
        Self::build(None, false)
    }

    pub fn with_slow_first_market(delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<Recorded>) {
        Self::build(Some(delay), false)
    }

    /// Market callbacks return an error after recording.
    pub fn failing() -> (Arc<Self>, mpsc::UnboundedReceiver<Recorded>) {
        Self::build(None, true)
    }

    fn build(
        slow_first_market: Option<Duration>,
        fail_market: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Recorded>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(Self {
            tx,
            market_calls: AtomicUsize::new(0),
            slow_first_market,
            fail_market,
        });
        (handler, rx)
    }

    fn record(&self, callback: &'static str, sequence: usize, body: Value) {
        let _ = self.tx.send(Recorded {
            callback,
            thread: std::thread::current().name().map(str::to_string),
            sequence,
            body,
        });
    }
}

impl AggregatorHandler for RecordingHandler {
    fn on_market_cycle(
        &self,
        _session: AggregatorSession,
        market: MarketCycle,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let sequence = self.market_calls.fetch_add(1, Ordering::SeqCst);
            if sequence == 0 {
                if let Some(delay) = self.slow_first_market {
                    tokio::time::sleep(delay).await;
                }
            }
            self.record("on_market_cycle", sequence, market.body);
            if self.fail_market {
                anyhow::bail!("market callback failed");
            }
            Ok(())
        })
    }

    fn on_finish(
        &self,
        _session: AggregatorSession,
        event: EventPayload,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.record("on_finish", 0, event.body);
            Ok(())
        })
    }

    fn on_batch_response(
        &self,
        _session: AggregatorSession,
        response: EventPayload,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.record("on_batch_response", 0, response.body);
            Ok(())
        })
    }

    fn on_device_selected(
        &self,
        _session: AggregatorSession,
        notice: SelectionNotice,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.record("on_device_selected", 0, notice.body);
            Ok(())
        })
    }

    fn on_device_unselected(
        &self,
        _session: AggregatorSession,
        notice: SelectionNotice,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.record("on_device_unselected", 0, notice.body);
            Ok(())
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn fast_config(name: &str) -> AggregatorConfig {
    AggregatorConfig::new(name).with_timeouts(Duration::from_secs(2), Duration::from_secs(2))
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 2s");
}

/// Next recorded callback with the given name, skipping others.
pub async fn next_callback(rx: &mut mpsc::UnboundedReceiver<Recorded>, callback: &str) -> Recorded {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let recorded = rx.recv().await.expect("handler channel closed");
            if recorded.callback == callback {
                return recorded;
            }
        }
    })
    .await
    .expect("callback not observed within 2s")
}
