//! `scope-core`
//!
//! Core trait definitions and types shared by the microscopy device adapters.
//!
//! A host application talks to hardware through a small set of capability
//! traits instead of a device class hierarchy:
//!
//! - [`capabilities::Device`]: lifecycle every adapter has (initialize, shutdown, busy)
//! - [`capabilities::HasProperties`]: named, string-valued property access
//! - [`capabilities::HasErrorText`]: numeric error code to message lookup
//! - Device-specific capabilities such as [`capabilities::SnapCamera`],
//!   [`capabilities::XyMovable`] and [`capabilities::DiscretePositioner`]
//!
//! Drivers register a [`driver::DriverFactory`] and hand back their capabilities in a
//! [`driver::DeviceComponents`] bag.

pub mod capabilities;
pub mod data;
pub mod driver;
pub mod error;
pub mod properties;
#[cfg(feature = "serial")]
pub mod serial;

pub use anyhow::{anyhow, Result};
