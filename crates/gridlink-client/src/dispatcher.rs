//! Inbound message routing and the delivery worker.
//!
//! The [`DeliveryWorker`] owns one subscription stream and feeds every
//! message, in order, to [`EventDispatcher::dispatch`]. Dispatch is
//! synchronous: it completes outstanding transactions, applies selection
//! changes and hands remaining events to an [`EventSink`], which must not
//! block.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use gridlink_bus::{decode_event, BusError, Event, MessageStream, RawMessage, SelectionNotice};
use gridlink_core::AggregatorHandle;
use gridlink_telemetry::Metrics;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::scope::LogScope;
use crate::selection::SelectedDevices;
use crate::tracker::TransactionTracker;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// EventSink
// ============================================================================

/// Receiver for events that survive dispatch.
///
/// Called on the delivery task; implementations hand work off and return.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: Event);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn deliver(&self, event: Event) {
        trace!(kind = event.kind(), "Event discarded");
    }
}

// ============================================================================
// EventDispatcher
// ============================================================================

/// Selected device set plus the aggregator it belongs to.
#[derive(Debug, Clone)]
pub struct SelectionBinding {
    pub devices: Arc<SelectedDevices>,
    /// Set once registration completes.
    pub aggregator: Arc<OnceCell<AggregatorHandle>>,
}

pub struct EventDispatcher {
    tracker: Arc<TransactionTracker>,
    selection: Option<SelectionBinding>,
    sink: Arc<dyn EventSink>,
}

impl EventDispatcher {
    pub fn new(tracker: Arc<TransactionTracker>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            tracker,
            selection: None,
            sink,
        }
    }

    #[must_use]
    pub fn with_selection(mut self, binding: SelectionBinding) -> Self {
        self.selection = Some(binding);
        self
    }

    pub fn tracker(&self) -> &Arc<TransactionTracker> {
        &self.tracker
    }

    /// Process one inbound message. Never fails; bad input is logged and dropped.
    pub fn dispatch(&self, message: &RawMessage) {
        let event = match decode_event(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                let reason = e.reason();
                let err = BusError::from(e);
                warn!(channel = %message.channel, reason, error = %err, "Dropping inbound message");
                Metrics::message_dropped(reason);
                return;
            }
        };

        Metrics::message_received(event.kind());
        trace!(channel = %message.channel, kind = event.kind(), "Inbound event");

        if let Some(id) = event.transaction_id() {
            if self.tracker.complete(id, event.body().clone()) {
                debug!(transaction_id = %id, kind = event.kind(), "Transaction completed");
            }
        }

        let forward = match &event {
            Event::Selection(notice) => self.apply_selection(notice, true),
            Event::Unselection(notice) => self.apply_selection(notice, false),
            Event::CommandResponse(_) => false,
            Event::MarketCycle(_) | Event::Finish(_) | Event::BatchResponse(_) => true,
        };

        if forward {
            self.sink.deliver(event);
        }
    }

    /// Returns whether the notice changed (or confirmed) this session's set.
    /// Rejected selections and unselections of unknown devices are dropped.
    fn apply_selection(&self, notice: &SelectionNotice, selected: bool) -> bool {
        let Some(binding) = &self.selection else {
            return true;
        };

        if let Some(named) = &notice.aggregator {
            if binding.aggregator.get() != Some(named) {
                debug!(
                    device_uuid = %notice.device,
                    aggregator_uuid = %named,
                    "Ignoring selection notice for another aggregator"
                );
                Metrics::message_dropped("foreign_aggregator");
                return false;
            }
        }

        if selected {
            let admitted = binding.devices.select(notice.device.clone());
            if !admitted {
                Metrics::message_dropped("not_allowed");
            }
            admitted
        } else {
            let removed = binding.devices.unselect(&notice.device);
            if !removed {
                debug!(device_uuid = %notice.device, "Ignoring unselection of a device that never selected");
                Metrics::message_dropped("not_selected");
            }
            removed
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("outstanding", &self.tracker.outstanding_count())
            .field("selection", &self.selection.is_some())
            .finish()
    }
}

// ============================================================================
// DeliveryWorker
// ============================================================================

/// Periodic expiry of unanswered fire-and-forget transactions.
#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    pub interval: Duration,
    pub max_age: Duration,
}

/// Owned delivery task for one subscription.
#[derive(Debug)]
pub struct DeliveryWorker {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryWorker {
    /// Spawn the delivery loop on the current runtime.
    pub fn spawn(
        stream: MessageStream,
        dispatcher: EventDispatcher,
        sweep: SweepSettings,
        scope: &LogScope,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scope.bind(run(stream, dispatcher, sweep, cancel.clone())));
        Self {
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Signal the loop to stop. Does not wait.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the loop to exit.
    pub async fn join(&self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Delivery worker ended abnormally");
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    mut stream: MessageStream,
    dispatcher: EventDispatcher,
    sweep: SweepSettings,
    cancel: CancellationToken,
) {
    let mut sweep_timer = tokio::time::interval(sweep.interval.max(MIN_SWEEP_INTERVAL));
    sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately
    sweep_timer.tick().await;

    debug!("Delivery worker started");
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("Delivery worker stopping");
                break;
            }

            message = stream.next() => {
                match message {
                    Some(message) => dispatcher.dispatch(&message),
                    None => {
                        warn!("Subscription stream ended, delivery worker exiting");
                        break;
                    }
                }
            }

            _ = sweep_timer.tick() => {
                let expired = dispatcher.tracker().expire(sweep.max_age);
                if !expired.is_empty() {
                    debug!(count = expired.len(), "Expired unanswered transactions");
                }
            }
        }
    }
}
