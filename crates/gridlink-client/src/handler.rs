//! User callbacks for aggregator events.
//!
//! Every method has a no-op default, so implementors override only the
//! events they care about. Callbacks run on the [`CallbackPool`]; returning
//! an error or panicking is logged and counted, never propagated.
//!
//! [`CallbackPool`]: crate::CallbackPool

use gridlink_bus::{BoxFuture, EventPayload, MarketCycle, SelectionNotice};

use crate::aggregator::AggregatorSession;

pub type CallbackResult = anyhow::Result<()>;

pub trait AggregatorHandler: Send + Sync + 'static {
    /// A new market slot opened.
    fn on_market_cycle(
        &self,
        _session: AggregatorSession,
        _market: MarketCycle,
    ) -> BoxFuture<'_, CallbackResult> {
        Box::pin(async { Ok(()) })
    }

    /// The simulation finished.
    fn on_finish(
        &self,
        _session: AggregatorSession,
        _event: EventPayload,
    ) -> BoxFuture<'_, CallbackResult> {
        Box::pin(async { Ok(()) })
    }

    /// Response to a batch command.
    fn on_batch_response(
        &self,
        _session: AggregatorSession,
        _response: EventPayload,
    ) -> BoxFuture<'_, CallbackResult> {
        Box::pin(async { Ok(()) })
    }

    /// A device was added to the selected set.
    fn on_device_selected(
        &self,
        _session: AggregatorSession,
        _notice: SelectionNotice,
    ) -> BoxFuture<'_, CallbackResult> {
        Box::pin(async { Ok(()) })
    }

    /// A device was removed from the selected set.
    fn on_device_unselected(
        &self,
        _session: AggregatorSession,
        _notice: SelectionNotice,
    ) -> BoxFuture<'_, CallbackResult> {
        Box::pin(async { Ok(()) })
    }
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl AggregatorHandler for NoopHandler {}
