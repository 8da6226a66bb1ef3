//! In-process pub/sub broker.
//!
//! Used by tests and local demos in place of Redis. Delivery follows Redis
//! semantics: a message published on a channel is delivered, in publish
//! order, to every live subscription with a matching pattern.

use crate::error::{BusError, BusResult};
use crate::pattern::glob_match;
use crate::transport::{BoxFuture, MessageStream, RawMessage, Transport};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// A message recorded by [`MemoryTransport::publish`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub channel: String,
    pub payload: String,
    pub published_at: DateTime<Utc>,
}

impl PublishedMessage {
    /// Parse the payload as JSON.
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.payload)
    }
}

struct Subscriber {
    patterns: Vec<String>,
    tx: mpsc::UnboundedSender<RawMessage>,
}

impl Subscriber {
    fn matching_pattern(&self, channel: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| glob_match(p, channel))
            .map(String::as_str)
    }
}

#[derive(Default)]
struct Broker {
    subscribers: Vec<Subscriber>,
    published: Vec<PublishedMessage>,
    fail_publish: bool,
}

impl Broker {
    fn deliver(&mut self, channel: &str, payload: &[u8]) -> usize {
        let now = Utc::now();
        let mut delivered = 0;
        self.subscribers.retain(|sub| {
            let Some(pattern) = sub.matching_pattern(channel) else {
                return !sub.tx.is_closed();
            };
            let msg = RawMessage {
                channel: channel.to_string(),
                pattern: Some(pattern.to_string()),
                payload: payload.to_vec(),
                received_at: now,
            };
            let alive = sub.tx.send(msg).is_ok();
            if alive {
                delivered += 1;
            }
            alive
        });
        delivered
    }
}

/// In-process [`Transport`] that records every publish.
#[derive(Default)]
pub struct MemoryTransport {
    broker: Mutex<Broker>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (or succeed again).
    pub fn set_fail_publish(&self, fail: bool) {
        self.broker.lock().fail_publish = fail;
    }

    /// Deliver raw bytes to subscribers without recording a publish.
    ///
    /// Lets tests inject payloads no well-behaved publisher would send.
    pub fn inject(&self, channel: &str, payload: impl AsRef<[u8]>) -> usize {
        self.broker.lock().deliver(channel, payload.as_ref())
    }

    /// All recorded publishes, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.broker.lock().published.clone()
    }

    /// Recorded publishes on one channel.
    pub fn published_on(&self, channel: &str) -> Vec<PublishedMessage> {
        self.broker
            .lock()
            .published
            .iter()
            .filter(|m| m.channel == channel)
            .cloned()
            .collect()
    }

    pub fn publish_count(&self) -> usize {
        self.broker.lock().published.len()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.broker
            .lock()
            .subscribers
            .iter()
            .filter(|s| !s.tx.is_closed())
            .count()
    }

    pub fn clear_published(&self) {
        self.broker.lock().published.clear();
    }
}

impl Transport for MemoryTransport {
    fn publish(&self, channel: String, payload: String) -> BoxFuture<'_, BusResult<()>> {
        Box::pin(async move {
            let mut broker = self.broker.lock();
            if broker.fail_publish {
                return Err(BusError::Publish {
                    channel,
                    reason: "publish disabled".to_string(),
                });
            }

            let delivered = broker.deliver(&channel, payload.as_bytes());
            debug!(%channel, delivered, "Published in memory");
            broker.published.push(PublishedMessage {
                channel,
                payload,
                published_at: Utc::now(),
            });
            Ok(())
        })
    }

    fn psubscribe(&self, patterns: Vec<String>) -> BoxFuture<'_, BusResult<MessageStream>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.broker.lock().subscribers.push(Subscriber { patterns, tx });

            let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|msg| (msg, rx))
            });
            Ok(stream.boxed())
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
