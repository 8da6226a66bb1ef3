//! Auto aggregator: raises the grid fee by one on every market cycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use gridlink_bus::{BoxFuture, EventPayload, MarketCycle, SelectionNotice};
use gridlink_client::{AggregatorHandler, AggregatorSession};
use gridlink_core::{BatchCommand, CommandPayload};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Handler that requests market stats and bumps grid fees each cycle.
#[derive(Debug, Default)]
pub struct AutoAggregator {
    fee_const: AtomicU64,
    finished: AtomicBool,
    finish_signal: Notify,
}

impl AutoAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current grid fee constant.
    pub fn fee_const(&self) -> u64 {
        self.fee_const.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Resolve once the simulation reported `finish`.
    pub async fn wait_finished(&self) {
        loop {
            let notified = self.finish_signal.notified();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }
}

/// `dso_market_stats` + `grid_fees(fee)` for every area in the cycle.
///
/// Entries without an `area_uuid` are skipped.
pub fn fee_batch(market: &MarketCycle, fee_const: u64) -> BatchCommand {
    let mut batch = BatchCommand::new();
    for area in market.area_ids() {
        batch.push(area.clone(), CommandPayload::dso_market_stats());
        batch.push(area, CommandPayload::grid_fees(fee_const));
    }
    batch
}

impl AggregatorHandler for AutoAggregator {
    fn on_market_cycle(
        &self,
        session: AggregatorSession,
        market: MarketCycle,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            info!(content = %market.body, "Market cycle");
            let fee_const = self.fee_const.fetch_add(1, Ordering::SeqCst) + 1;

            let batch = fee_batch(&market, fee_const);
            if batch.is_empty() {
                return Ok(());
            }
            let response = session.batch_command_blocking(batch).await?;
            warn!(fee_const, %response, "Batch command placed on the new market");
            Ok(())
        })
    }

    fn on_finish(
        &self,
        _session: AggregatorSession,
        event: EventPayload,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            info!(body = %event.body, "Simulation finished");
            self.finished.store(true, Ordering::SeqCst);
            self.finish_signal.notify_waiters();
            Ok(())
        })
    }

    fn on_batch_response(
        &self,
        _session: AggregatorSession,
        response: EventPayload,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            info!(body = %response.body, "Batch response");
            Ok(())
        })
    }

    fn on_device_selected(
        &self,
        _session: AggregatorSession,
        notice: SelectionNotice,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            info!(device = %notice.device, "Device selected");
            Ok(())
        })
    }
}
