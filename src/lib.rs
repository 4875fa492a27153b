//! Microscopy device adapters
//!
//! Application layer over the driver crates:
//!
//! - [`config`]: Figment-loaded application and device configuration
//! - [`logging`]: tracing subscriber setup
//! - [`registry`]: driver factories and the devices built from configuration
//!
//! Drivers:
//!
//! - [`scope_driver_acquire`]: dual-camera acquisition adapter
//! - `scope_driver_asi`: ASI Tiger XY stage and filter wheel (feature `instrument_asi`)

pub mod config;
pub mod logging;
pub mod registry;

pub use config::{AppConfig, DeviceDefinition, LogFormat};
pub use registry::{BuildSummary, DeviceRegistry, FactoryInfo, RegisteredDevice};

pub use scope_core;
pub use scope_driver_acquire;
#[cfg(feature = "instrument_asi")]
pub use scope_driver_asi;
