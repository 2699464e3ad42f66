//! AquaWiz Bridge Library
//!
//! This library polls the AquaWiz cloud for reef-tank water chemistry (alkalinity, pH,
//! pH after outgassing, dosing) and publishes the latest reading plus a one-time
//! history backfill to whatever automation host embeds it.

pub mod aquawiz_api;
pub mod config;
pub mod data_coordinator;
pub mod error;
pub mod reading;
pub mod sensors;
pub mod setup_flow;
pub mod statistics;

// Re-export commonly used types for easier access
pub use aquawiz_api::AquaWizAPI;
pub use config::{Config, Credentials, PollInterval};
pub use data_coordinator::{CoordinatorData, CoordinatorHandle, DataCoordinator};
pub use error::{ApiError, AuthError, ConfigError};
pub use reading::{Device, Milli, Reading, Snapshot};
pub use sensors::{SensorEntity, SensorKind};
pub use setup_flow::{ConfigEntry, SetupError};
