//! Transport trait for publish / pattern-subscribe.
//!
//! Provides a trait-based abstraction over the pub/sub backend so that the
//! correlation engine can be driven by Redis in production and by the
//! in-process [`MemoryTransport`](crate::MemoryTransport) in tests.

use crate::error::BusResult;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Stream of inbound messages for one subscription.
pub type MessageStream = BoxStream<'static, RawMessage>;

/// An inbound message as delivered by the transport, not yet decoded.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Concrete channel the message was published on.
    pub channel: String,
    /// Subscription pattern that matched, for pattern subscriptions.
    pub pattern: Option<String>,
    /// Raw payload bytes (normally UTF-8 JSON).
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            pattern: None,
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// Pub/sub backend.
///
/// Implementations must allow concurrent `publish` calls from any task.
pub trait Transport: Send + Sync {
    /// Publish a payload on a channel.
    fn publish(&self, channel: String, payload: String) -> BoxFuture<'_, BusResult<()>>;

    /// Subscribe to one or more glob patterns.
    ///
    /// The subscription is active once the returned future resolves; every
    /// message published afterwards on a matching channel is yielded by the
    /// stream in publish order.
    fn psubscribe(&self, patterns: Vec<String>) -> BoxFuture<'_, BusResult<MessageStream>>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}

/// Arc wrapper for Transport trait objects.
pub type DynTransport = Arc<dyn Transport>;
