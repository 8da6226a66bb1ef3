//! Correlation engine and sessions for the gridlink energy-market client.
//!
//! An [`AggregatorSession`] registers with the simulation, tracks which
//! devices selected it and issues batched commands on their behalf. A
//! [`DeviceSession`] is the peer-side handle that selects an aggregator.
//!
//! Both sessions share the same machinery:
//! - [`TransactionTracker`]: outstanding transaction ids and completion
//!   signalling with timeouts
//! - [`EventDispatcher`] driven by a [`DeliveryWorker`]: decodes inbound
//!   messages in order and routes them
//! - [`CallbackPool`]: runs user callbacks on a dedicated runtime so that
//!   user code never stalls message delivery

pub mod aggregator;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod pool;
pub mod scope;
pub mod selection;
pub mod tracker;

pub use aggregator::AggregatorSession;
pub use config::{AggregatorConfig, DeviceConfig, SelectionPolicy};
pub use device::DeviceSession;
pub use dispatcher::{DeliveryWorker, EventDispatcher, EventSink, NullSink, SelectionBinding, SweepSettings};
pub use error::{ClientError, ClientResult, TrackerError};
pub use handler::{AggregatorHandler, NoopHandler};
pub use pool::CallbackPool;
pub use scope::LogScope;
pub use selection::SelectedDevices;
pub use tracker::{PendingTransaction, TransactionTracker};
