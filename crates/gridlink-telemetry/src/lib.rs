//! Prometheus metrics and structured logging for gridlink.
//!
//! - Logging is configured explicitly through [`LoggingConfig`]; the result
//!   is a `tracing::Dispatch` that can be installed globally by a binary or
//!   injected into a single session.
//! - Metrics cover message delivery, transaction correlation and callback
//!   execution.

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{build_dispatch, init_logging, LogFormat, LoggingConfig};
pub use metrics::Metrics;
