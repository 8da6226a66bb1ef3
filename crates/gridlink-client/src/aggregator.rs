//! Aggregator session.
//!
//! Lifecycle: `Uninitialized -> Registering -> Registered -> Deregistering
//! -> Terminated`. The session subscribes and starts its delivery worker
//! before publishing CREATE, so the acknowledgment cannot be missed.

use std::sync::{Arc, Weak};
use std::time::Duration;

use gridlink_bus::{DynTransport, Event, OutboundMessage};
use gridlink_core::{AggregatorHandle, BatchCommand, DeviceId, SessionState, TransactionId};
use gridlink_telemetry::Metrics;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn};

use crate::config::AggregatorConfig;
use crate::dispatcher::{DeliveryWorker, EventDispatcher, EventSink, SelectionBinding, SweepSettings};
use crate::error::{ClientError, ClientResult, TrackerError};
use crate::handler::AggregatorHandler;
use crate::pool::CallbackPool;
use crate::scope::LogScope;
use crate::selection::SelectedDevices;
use crate::tracker::{PendingTransaction, TransactionTracker};

/// Handle to a registered aggregator. Cheap to clone.
#[derive(Clone)]
pub struct AggregatorSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: AggregatorConfig,
    transport: DynTransport,
    tracker: Arc<TransactionTracker>,
    selected: Arc<SelectedDevices>,
    handle: Arc<OnceCell<AggregatorHandle>>,
    state: RwLock<SessionState>,
    pool: Arc<CallbackPool>,
    worker: DeliveryWorker,
    scope: LogScope,
}

impl AggregatorSession {
    /// Subscribe, start the workers and register with the simulation.
    ///
    /// Returns once the CREATE acknowledgment arrives. On timeout the
    /// workers are stopped and [`ClientError::RegistrationTimeout`] is
    /// returned.
    pub async fn connect(
        config: AggregatorConfig,
        transport: DynTransport,
        handler: Arc<dyn AggregatorHandler>,
    ) -> ClientResult<Self> {
        let scope = LogScope::new(config.dispatch.clone(), || {
            info_span!("aggregator", name = %config.name)
        });
        scope
            .bind(Self::start(config, transport, handler, scope.clone()))
            .await
    }

    async fn start(
        config: AggregatorConfig,
        transport: DynTransport,
        handler: Arc<dyn AggregatorHandler>,
        scope: LogScope,
    ) -> ClientResult<Self> {
        let stream = transport
            .psubscribe(config.channels.aggregator_patterns())
            .await?;
        debug!(transport = transport.name(), "Subscribed to aggregator channels");

        let tracker = Arc::new(TransactionTracker::new());
        let selected = Arc::new(SelectedDevices::new(config.selection_policy.clone()));
        let handle = Arc::new(OnceCell::new());
        let pool = Arc::new(CallbackPool::new(config.max_workers, scope.clone())?);
        let sweep = SweepSettings {
            interval: config.sweep_interval(),
            max_age: config.expire_after(),
        };

        let inner = Arc::new_cyclic(|session| {
            let sink = Arc::new(HandlerSink {
                session: session.clone(),
                handler,
            });
            let dispatcher = EventDispatcher::new(tracker.clone(), sink).with_selection(
                SelectionBinding {
                    devices: selected.clone(),
                    aggregator: handle.clone(),
                },
            );
            let worker = DeliveryWorker::spawn(stream, dispatcher, sweep, &scope);

            SessionInner {
                config,
                transport,
                tracker,
                selected,
                handle,
                state: RwLock::new(SessionState::Uninitialized),
                pool,
                worker,
                scope,
            }
        });

        let session = Self { inner };
        session.register().await?;
        Ok(session)
    }

    async fn register(&self) -> ClientResult<()> {
        self.set_state(SessionState::Registering);
        info!("Registering aggregator");

        let ticket = self.inner.tracker.begin();
        let transaction_id = ticket.id().clone();
        let message = OutboundMessage::Create {
            name: self.inner.config.name.clone(),
            transaction_id: transaction_id.clone(),
        };
        let channel = self.inner.config.channels.aggregator_command.clone();
        if let Err(e) = self.publish(channel, &message).await {
            self.inner.tracker.abandon(&transaction_id);
            self.terminate().await;
            return Err(e);
        }

        let timeout = self.inner.config.registration_timeout();
        match self.wait(ticket, &message, timeout).await {
            Ok(body) => {
                // Older servers answer without aggregator_uuid; the creation
                // transaction id is then the handle
                let assigned = body
                    .get("aggregator_uuid")
                    .and_then(Value::as_str)
                    .map(AggregatorHandle::new)
                    .unwrap_or_else(|| AggregatorHandle::from(transaction_id));
                let handle = self.inner.handle.get_or_init(|| assigned).clone();
                self.set_state(SessionState::Registered);
                info!(aggregator_uuid = %handle, "Aggregator registered");
                Ok(())
            }
            Err(TrackerError::Timeout { .. }) => {
                error!(?timeout, "Aggregator registration timed out");
                self.terminate().await;
                Err(ClientError::RegistrationTimeout(timeout))
            }
            Err(e) => {
                self.terminate().await;
                Err(ClientError::Transaction(e))
            }
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Publish a batch command and return its transaction id without waiting.
    ///
    /// Every device in `batch` must have selected this aggregator; otherwise
    /// nothing is published and [`ClientError::DeviceNotSelected`] lists the
    /// offending devices.
    pub async fn batch_command(&self, batch: BatchCommand) -> ClientResult<TransactionId> {
        let ticket = self.inner.scope.bind(self.send_batch(batch)).await?;
        Ok(ticket.id().clone())
    }

    /// Publish a batch command and wait for its response body.
    pub async fn batch_command_blocking(&self, batch: BatchCommand) -> ClientResult<Value> {
        self.inner
            .scope
            .bind(async {
                let ticket = self.send_batch(batch).await?;
                let transaction_id = ticket.id().clone();
                let timeout = self.inner.config.command_timeout();
                match self.inner.tracker.await_completion(ticket, timeout).await {
                    Ok(body) => Ok(body),
                    Err(TrackerError::Timeout { .. }) => {
                        Metrics::transaction_timed_out("BATCHED");
                        warn!(%transaction_id, ?timeout, "Batch command timed out");
                        Err(ClientError::CommandTimeout {
                            transaction_id,
                            timeout,
                        })
                    }
                    Err(e) => Err(ClientError::Transaction(e)),
                }
            })
            .await
    }

    async fn send_batch(&self, batch: BatchCommand) -> ClientResult<PendingTransaction> {
        let handle = self.require_registered()?;

        let missing = self.inner.selected.missing(batch.device_ids());
        if !missing.is_empty() {
            error!(devices = ?missing, "Batch names devices that did not select this aggregator");
            return Err(ClientError::DeviceNotSelected(missing));
        }

        let devices = batch.len();
        let commands = batch.command_count();
        let ticket = self.inner.tracker.begin();
        let transaction_id = ticket.id().clone();
        let channel = self.inner.config.channels.batch_channel(&handle);
        let message = OutboundMessage::Batched {
            transaction_id: transaction_id.clone(),
            aggregator_uuid: handle,
            batch_commands: batch,
        };

        if let Err(e) = self.publish(channel, &message).await {
            self.inner.tracker.abandon(&transaction_id);
            return Err(e);
        }
        debug!(%transaction_id, devices, commands, "Batch command sent");
        Ok(ticket)
    }

    /// Deregister from the simulation.
    ///
    /// On success the session is terminated and its workers stopped. On
    /// timeout the session stays registered and
    /// [`ClientError::DeregistrationTimeout`] is returned.
    pub async fn delete(&self) -> ClientResult<()> {
        self.inner.scope.bind(self.deregister()).await
    }

    async fn deregister(&self) -> ClientResult<()> {
        self.ensure_delivering()?;
        let handle = {
            let mut state = self.inner.state.write();
            match *state {
                SessionState::Registered => {}
                SessionState::Terminated => return Err(ClientError::SessionTerminated),
                other => return Err(ClientError::NotRegistered(other)),
            }
            let Some(handle) = self.inner.handle.get().cloned() else {
                return Err(ClientError::NotRegistered(*state));
            };
            *state = SessionState::Deregistering;
            handle
        };
        info!(aggregator_uuid = %handle, "Deleting aggregator");

        let ticket = self.inner.tracker.begin();
        let transaction_id = ticket.id().clone();
        let message = OutboundMessage::Delete {
            name: self.inner.config.name.clone(),
            aggregator_uuid: handle,
            transaction_id: transaction_id.clone(),
        };
        let channel = self.inner.config.channels.aggregator_command.clone();
        if let Err(e) = self.publish(channel, &message).await {
            self.inner.tracker.abandon(&transaction_id);
            self.set_state(SessionState::Registered);
            return Err(e);
        }

        let timeout = self.inner.config.registration_timeout();
        match self.wait(ticket, &message, timeout).await {
            Ok(_) => {
                info!("Aggregator deleted");
                self.terminate().await;
                Ok(())
            }
            Err(TrackerError::Timeout { .. }) => {
                warn!(?timeout, "Aggregator deletion timed out, still registered");
                self.set_state(SessionState::Registered);
                Err(ClientError::DeregistrationTimeout(timeout))
            }
            Err(e) => {
                self.set_state(SessionState::Registered);
                Err(ClientError::Transaction(e))
            }
        }
    }

    /// Stop the delivery worker and callback pool without deregistering.
    ///
    /// Called from inside a callback, the calling unit is dropped once the
    /// pool stops.
    pub async fn shutdown(&self) {
        self.inner.scope.bind(self.terminate()).await;
    }

    async fn terminate(&self) {
        self.set_state(SessionState::Terminated);
        self.inner.worker.join().await;
        let cancelled = self.inner.tracker.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "Cancelled outstanding transactions");
        }
        self.inner.pool.shutdown();
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn publish(&self, channel: String, message: &OutboundMessage) -> ClientResult<()> {
        let payload = message.to_json()?;
        self.inner.transport.publish(channel.clone(), payload).await?;
        Metrics::command_published(message.kind());
        debug!(
            %channel,
            command = message.kind(),
            transaction_id = %message.transaction_id(),
            "Command published"
        );
        Ok(())
    }

    async fn wait(
        &self,
        ticket: PendingTransaction,
        message: &OutboundMessage,
        timeout: Duration,
    ) -> Result<Value, TrackerError> {
        let result = self.inner.tracker.await_completion(ticket, timeout).await;
        if matches!(result, Err(TrackerError::Timeout { .. })) {
            Metrics::transaction_timed_out(message.kind());
        }
        result
    }

    /// Fails with [`ClientError::SessionTerminated`] once the delivery worker
    /// has exited, e.g. because the subscription stream ended. The session is
    /// moved to `Terminated` and outstanding waits are cancelled.
    fn ensure_delivering(&self) -> ClientResult<()> {
        if self.inner.worker.is_running() {
            return Ok(());
        }
        let previous = {
            let mut state = self.inner.state.write();
            std::mem::replace(&mut *state, SessionState::Terminated)
        };
        if previous != SessionState::Terminated {
            let cancelled = self.inner.tracker.cancel_all();
            warn!(from = %previous, cancelled, "Delivery worker stopped, session terminated");
        }
        Err(ClientError::SessionTerminated)
    }

    fn require_registered(&self) -> ClientResult<AggregatorHandle> {
        self.ensure_delivering()?;
        match self.state() {
            SessionState::Registered => self
                .inner
                .handle
                .get()
                .cloned()
                .ok_or(ClientError::NotRegistered(SessionState::Registered)),
            SessionState::Terminated => Err(ClientError::SessionTerminated),
            other => Err(ClientError::NotRegistered(other)),
        }
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.inner.state.write();
        let previous = *state;
        if previous != next {
            debug!(from = %previous, to = %next, "Session state changed");
            *state = next;
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current state. Reports `Terminated` as soon as the delivery worker
    /// is gone, even before the next command notices it.
    #[must_use]
    pub fn state(&self) -> SessionState {
        let state = *self.inner.state.read();
        if state != SessionState::Terminated && !self.inner.worker.is_running() {
            return SessionState::Terminated;
        }
        state
    }

    /// Server-assigned id, set once registration completes.
    #[must_use]
    pub fn aggregator_uuid(&self) -> Option<AggregatorHandle> {
        self.inner.handle.get().cloned()
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Sorted ids of the devices that selected this aggregator.
    #[must_use]
    pub fn selected_devices(&self) -> Vec<DeviceId> {
        self.inner.selected.snapshot()
    }

    #[must_use]
    pub fn is_selected(&self, device: &DeviceId) -> bool {
        self.inner.selected.contains(device)
    }

    #[must_use]
    pub fn is_outstanding(&self, transaction_id: &TransactionId) -> bool {
        self.inner.tracker.is_outstanding(transaction_id)
    }

    #[must_use]
    pub fn outstanding_transactions(&self) -> usize {
        self.inner.tracker.outstanding_count()
    }

    /// Callbacks submitted but not yet finished.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.inner.pool.pending()
    }
}

impl std::fmt::Debug for AggregatorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorSession")
            .field("name", &self.inner.config.name)
            .field("aggregator_uuid", &self.inner.handle.get())
            .field("state", &self.state())
            .field("selected", &self.inner.selected.len())
            .finish()
    }
}

// ============================================================================
// HandlerSink
// ============================================================================

/// Routes dispatched events to the user handler via the callback pool.
///
/// Holds the session weakly so the delivery task does not keep it alive.
struct HandlerSink {
    session: Weak<SessionInner>,
    handler: Arc<dyn AggregatorHandler>,
}

impl EventSink for HandlerSink {
    fn deliver(&self, event: Event) {
        let Some(inner) = self.session.upgrade() else {
            debug!(kind = event.kind(), "Session dropped, discarding event");
            return;
        };
        let pool = inner.pool.clone();
        let session = AggregatorSession { inner };
        let handler = self.handler.clone();

        match event {
            Event::MarketCycle(market) => {
                info!(areas = market.content().len(), "New market cycle");
                pool.submit("on_market_cycle", async move {
                    handler.on_market_cycle(session, market).await
                });
            }
            Event::Finish(event) => {
                info!("Simulation finished");
                pool.submit("on_finish", async move { handler.on_finish(session, event).await });
            }
            Event::BatchResponse(response) => {
                pool.submit("on_batch_response", async move {
                    handler.on_batch_response(session, response).await
                });
            }
            Event::Selection(notice) => {
                pool.submit("on_device_selected", async move {
                    handler.on_device_selected(session, notice).await
                });
            }
            Event::Unselection(notice) => {
                pool.submit("on_device_unselected", async move {
                    handler.on_device_unselected(session, notice).await
                });
            }
            Event::CommandResponse(_) => {}
        }
    }
}
