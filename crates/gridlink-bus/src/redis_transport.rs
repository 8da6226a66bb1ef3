//! Redis pub/sub transport.
//!
//! Publishing goes through a multiplexed [`ConnectionManager`], which is
//! cheap to clone and safe to use from many tasks at once. Every
//! subscription opens its own dedicated pub/sub connection.

use crate::error::{BusError, BusResult};
use crate::transport::{BoxFuture, MessageStream, RawMessage, Transport};
use chrono::Utc;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Redis connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Redis-backed [`Transport`].
pub struct RedisTransport {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisTransport {
    /// Open the publishing connection.
    pub async fn connect(config: &RedisConfig) -> BusResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| BusError::Connection(e.to_string()))?;

        let conn = ConnectionManager::new(client.clone()).await?;
        info!(url = %config.url, "Connected to Redis");

        Ok(Self { client, conn })
    }
}

impl Transport for RedisTransport {
    fn publish(&self, channel: String, payload: String) -> BoxFuture<'_, BusResult<()>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let receivers: i64 =
                conn.publish(&channel, payload)
                    .await
                    .map_err(|e| BusError::Publish {
                        channel: channel.clone(),
                        reason: e.to_string(),
                    })?;
            debug!(%channel, receivers, "Published to Redis");
            Ok(())
        })
    }

    fn psubscribe(&self, patterns: Vec<String>) -> BoxFuture<'_, BusResult<MessageStream>> {
        Box::pin(async move {
            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(|e| BusError::Subscribe(e.to_string()))?;

            for pattern in &patterns {
                pubsub
                    .psubscribe(pattern)
                    .await
                    .map_err(|e| BusError::Subscribe(format!("{pattern}: {e}")))?;
            }
            info!(?patterns, "Subscribed to Redis patterns");

            let stream = pubsub.into_on_message().map(|msg| {
                let pattern = if msg.from_pattern() {
                    msg.get_pattern::<String>().ok()
                } else {
                    None
                };
                RawMessage {
                    channel: msg.get_channel_name().to_string(),
                    pattern,
                    payload: msg.get_payload_bytes().to_vec(),
                    received_at: Utc::now(),
                }
            });

            Ok(stream.boxed())
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
