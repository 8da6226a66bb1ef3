//! Device session: the peer side that selects an aggregator.

use std::sync::Arc;

use gridlink_bus::{DynTransport, OutboundMessage};
use gridlink_core::{AggregatorHandle, DeviceId};
use gridlink_telemetry::Metrics;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, info_span, warn};

use crate::config::DeviceConfig;
use crate::dispatcher::{DeliveryWorker, EventDispatcher, NullSink, SweepSettings};
use crate::error::{ClientError, ClientResult, TrackerError};
use crate::scope::LogScope;
use crate::tracker::TransactionTracker;

#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    config: DeviceConfig,
    transport: DynTransport,
    tracker: Arc<TransactionTracker>,
    selected: RwLock<Option<AggregatorHandle>>,
    worker: DeliveryWorker,
    scope: LogScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Select,
    Unselect,
}

impl DeviceSession {
    /// Subscribe to the device's response channel and start delivery.
    pub async fn connect(config: DeviceConfig, transport: DynTransport) -> ClientResult<Self> {
        let scope = LogScope::new(config.dispatch.clone(), || {
            info_span!("device", device_uuid = %config.device_id)
        });
        let bound = scope.clone();
        bound
            .bind(async move {
                let pattern = config.channels.device_response_pattern(&config.device_id);
                let stream = transport.psubscribe(vec![pattern.clone()]).await?;
                debug!(%pattern, transport = transport.name(), "Subscribed to device responses");

                let tracker = Arc::new(TransactionTracker::new());
                let dispatcher = EventDispatcher::new(tracker.clone(), Arc::new(NullSink));
                let sweep = SweepSettings {
                    interval: config.sweep_interval(),
                    max_age: config.expire_after(),
                };
                let worker = DeliveryWorker::spawn(stream, dispatcher, sweep, &scope);

                Ok::<_, ClientError>(Self {
                    inner: Arc::new(DeviceInner {
                        config,
                        transport,
                        tracker,
                        selected: RwLock::new(None),
                        worker,
                        scope,
                    }),
                })
            })
            .await
    }

    /// Opt into `aggregator` and wait for the acknowledgment.
    pub async fn select_aggregator(&self, aggregator: &AggregatorHandle) -> ClientResult<Value> {
        self.inner
            .scope
            .bind(self.send(Selection::Select, aggregator))
            .await
    }

    /// Opt out of `aggregator` and wait for the acknowledgment.
    pub async fn unselect_aggregator(&self, aggregator: &AggregatorHandle) -> ClientResult<Value> {
        self.inner
            .scope
            .bind(self.send(Selection::Unselect, aggregator))
            .await
    }

    async fn send(&self, kind: Selection, aggregator: &AggregatorHandle) -> ClientResult<Value> {
        if !self.inner.worker.is_running() {
            return Err(ClientError::SessionTerminated);
        }

        let device = self.inner.config.device_id.clone();
        let ticket = self.inner.tracker.begin();
        let transaction_id = ticket.id().clone();
        let message = match kind {
            Selection::Select => OutboundMessage::Select {
                aggregator_uuid: aggregator.clone(),
                device_uuid: device.clone(),
                transaction_id: transaction_id.clone(),
            },
            Selection::Unselect => OutboundMessage::Unselect {
                aggregator_uuid: aggregator.clone(),
                device_uuid: device.clone(),
                transaction_id: transaction_id.clone(),
            },
        };

        let channel = self.inner.config.channels.device_command_channel(&device);
        let published = match message.to_json() {
            Ok(payload) => self
                .inner
                .transport
                .publish(channel.clone(), payload)
                .await
                .map_err(ClientError::from),
            Err(e) => Err(ClientError::from(e)),
        };
        if let Err(e) = published {
            self.inner.tracker.abandon(&transaction_id);
            return Err(e);
        }
        Metrics::command_published(message.kind());
        debug!(%channel, command = message.kind(), %transaction_id, "Command published");

        let timeout = self.inner.config.selection_timeout();
        match self.inner.tracker.await_completion(ticket, timeout).await {
            Ok(body) => {
                let mut selected = self.inner.selected.write();
                match kind {
                    Selection::Select => {
                        info!(aggregator_uuid = %aggregator, "Selected aggregator");
                        *selected = Some(aggregator.clone());
                    }
                    Selection::Unselect => {
                        info!(aggregator_uuid = %aggregator, "Unselected aggregator");
                        if selected.as_ref() == Some(aggregator) {
                            *selected = None;
                        }
                    }
                }
                Ok(body)
            }
            Err(TrackerError::Timeout { .. }) => {
                Metrics::transaction_timed_out(message.kind());
                warn!(aggregator_uuid = %aggregator, ?timeout, command = message.kind(), "Selection timed out");
                Err(ClientError::SelectionTimeout {
                    device,
                    aggregator: aggregator.clone(),
                    timeout,
                })
            }
            Err(e) => Err(ClientError::Transaction(e)),
        }
    }

    /// Aggregator this device currently selects, if any.
    #[must_use]
    pub fn selected_aggregator(&self) -> Option<AggregatorHandle> {
        self.inner.selected.read().clone()
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.inner.config.device_id
    }

    #[must_use]
    pub fn outstanding_transactions(&self) -> usize {
        self.inner.tracker.outstanding_count()
    }

    /// Stop the delivery worker. Later selections fail with
    /// [`ClientError::SessionTerminated`].
    pub async fn shutdown(&self) {
        self.inner
            .scope
            .bind(async {
                self.inner.worker.join().await;
                self.inner.tracker.cancel_all();
            })
            .await;
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device_uuid", &self.inner.config.device_id)
            .field("selected", &*self.inner.selected.read())
            .finish()
    }
}
