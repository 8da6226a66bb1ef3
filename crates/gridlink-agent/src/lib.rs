//! Demo agent for the energy-market simulation.
//!
//! Registers an aggregator, lets a set of devices select it and then
//! raises grid fees on every market cycle until the simulation finishes.

pub mod app;
pub mod auto;
pub mod config;
pub mod error;

pub use app::Application;
pub use auto::AutoAggregator;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
