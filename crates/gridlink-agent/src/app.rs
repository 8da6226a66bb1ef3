//! Agent orchestration.

use std::sync::Arc;

use gridlink_bus::{DynTransport, RedisTransport};
use gridlink_client::{AggregatorSession, DeviceConfig, DeviceSession};
use tracing::{error, info, warn};

use crate::auto::AutoAggregator;
use crate::config::AppConfig;
use crate::error::AppResult;

/// Runs one aggregator and its devices until the simulation finishes.
pub struct Application {
    config: AppConfig,
    handler: Arc<AutoAggregator>,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            handler: Arc::new(AutoAggregator::new()),
        }
    }

    /// Connect to Redis and run until `finish` or Ctrl-C.
    pub async fn run(&self) -> AppResult<()> {
        let transport: DynTransport = Arc::new(RedisTransport::connect(&self.config.redis).await?);
        self.run_with(transport).await
    }

    /// Run over an already connected transport.
    pub async fn run_with(&self, transport: DynTransport) -> AppResult<()> {
        let aggregator = AggregatorSession::connect(
            self.config.aggregator.clone(),
            transport.clone(),
            self.handler.clone(),
        )
        .await?;
        let Some(handle) = aggregator.aggregator_uuid() else {
            // connect only returns Ok once the handle is set
            aggregator.shutdown().await;
            return Ok(());
        };
        info!(aggregator_uuid = %handle, name = aggregator.name(), "Aggregator registered");

        let mut devices = Vec::with_capacity(self.config.devices.len());
        for device_id in &self.config.devices {
            let config = DeviceConfig::new(device_id.clone())
                .with_selection_timeout(self.config.selection_timeout());
            let device = DeviceSession::connect(config, transport.clone()).await?;
            match device.select_aggregator(&handle).await {
                Ok(response) => warn!(device = %device_id, %response, "Selected aggregator"),
                Err(e) => error!(device = %device_id, error = %e, "Selection failed"),
            }
            devices.push(device);
        }

        tokio::select! {
            _ = self.handler.wait_finished() => {
                info!(fee_const = self.handler.fee_const(), "Simulation finished");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
        }

        for device in &devices {
            device.shutdown().await;
        }
        if let Err(e) = aggregator.delete().await {
            warn!(error = %e, "Deregistration failed, shutting down anyway");
            aggregator.shutdown().await;
        }
        Ok(())
    }

    pub fn handler(&self) -> &Arc<AutoAggregator> {
        &self.handler
    }
}
