//! Driver Factory and Component Types
//!
//! Drivers implement [`DriverFactory`] and are registered with the device
//! registry at startup via explicit `registry.register_factory(factory)` calls.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Composition Root (main.rs)                   │
//! │  registry.register_factory(DualCameraFactory);                  │
//! │  registry.register_factory(AsiXyStageFactory);                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        DeviceRegistry                           │
//! │  factories: DashMap<driver_type, Box<dyn DriverFactory>>       │
//! │  devices: DashMap<device_id, Arc<RegisteredDevice>>            │
//! └─────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    DriverFactory::build()                       │
//! │  Parses TOML config, instantiates driver, returns capabilities │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use crate::capabilities::{
    Device, DeviceCategory, DiscretePositioner, ExposureControl, HasErrorText, HasProperties,
    SnapCamera, XyMovable,
};
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Capability Enum (Runtime Introspection)
// =============================================================================

/// Runtime capability flags for device introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Corresponds to [`crate::capabilities::Device`]
    Device,
    /// Corresponds to [`crate::capabilities::HasProperties`]
    Properties,
    /// Corresponds to [`crate::capabilities::HasErrorText`]
    ErrorText,
    /// Corresponds to [`crate::capabilities::ExposureControl`]
    ExposureControl,
    /// Corresponds to [`crate::capabilities::SnapCamera`]
    SnapCamera,
    /// Corresponds to [`crate::capabilities::XyMovable`]
    XyMovable,
    /// Corresponds to [`crate::capabilities::DiscretePositioner`]
    DiscretePositioner,
}

impl Capability {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Device => "Device",
            Self::Properties => "Properties",
            Self::ErrorText => "Error Text",
            Self::ExposureControl => "Exposure Control",
            Self::SnapCamera => "Snap Camera",
            Self::XyMovable => "XY Movable",
            Self::DiscretePositioner => "Discrete Positioner",
        }
    }
}

// =============================================================================
// Device Components (Capability Bag)
// =============================================================================

/// Container for capability trait objects returned by drivers.
///
/// ```rust,ignore
/// let camera = Arc::new(DualCamera::new(config, provider));
///
/// let components = DeviceComponents::new()
///     .with_category(DeviceCategory::Camera)
///     .with_device(camera.clone())
///     .with_snap_camera(camera);
/// ```
#[derive(Default)]
pub struct DeviceComponents {
    /// Device category for grouping
    pub category: Option<DeviceCategory>,

    /// Lifecycle, always present
    pub device: Option<Arc<dyn Device>>,

    /// Host-visible property table
    pub properties: Option<Arc<dyn HasProperties>>,

    /// Text for adapter-specific error codes
    pub error_text: Option<Arc<dyn HasErrorText>>,

    /// Exposure time control
    pub exposure_control: Option<Arc<dyn ExposureControl>>,

    /// Single-shot image acquisition
    pub snap_camera: Option<Arc<dyn SnapCamera>>,

    /// Two-axis motion
    pub xy_movable: Option<Arc<dyn XyMovable>>,

    /// Indexed positions
    pub discrete_positioner: Option<Arc<dyn DiscretePositioner>>,
}

impl DeviceComponents {
    /// Empty bag; add capabilities with the `with_*` builders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get list of capabilities this device supports
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();

        if self.device.is_some() {
            caps.push(Capability::Device);
        }
        if self.properties.is_some() {
            caps.push(Capability::Properties);
        }
        if self.error_text.is_some() {
            caps.push(Capability::ErrorText);
        }
        if self.exposure_control.is_some() {
            caps.push(Capability::ExposureControl);
        }
        if self.snap_camera.is_some() {
            caps.push(Capability::SnapCamera);
        }
        if self.xy_movable.is_some() {
            caps.push(Capability::XyMovable);
        }
        if self.discrete_positioner.is_some() {
            caps.push(Capability::DiscretePositioner);
        }

        caps
    }

    // Builder methods

    /// Set the grouping category.
    pub fn with_category(mut self, category: DeviceCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Attach the lifecycle capability.
    pub fn with_device(mut self, d: Arc<dyn Device>) -> Self {
        self.device = Some(d);
        self
    }

    /// Attach the property table.
    pub fn with_properties(mut self, p: Arc<dyn HasProperties>) -> Self {
        self.properties = Some(p);
        self
    }

    /// Attach error-code lookup.
    pub fn with_error_text(mut self, e: Arc<dyn HasErrorText>) -> Self {
        self.error_text = Some(e);
        self
    }

    /// Attach exposure control.
    pub fn with_exposure_control(mut self, e: Arc<dyn ExposureControl>) -> Self {
        self.exposure_control = Some(e);
        self
    }

    /// Attach single-shot acquisition.
    pub fn with_snap_camera(mut self, c: Arc<dyn SnapCamera>) -> Self {
        self.snap_camera = Some(c);
        self
    }

    /// Attach two-axis motion.
    pub fn with_xy_movable(mut self, m: Arc<dyn XyMovable>) -> Self {
        self.xy_movable = Some(m);
        self
    }

    /// Attach indexed positioning.
    pub fn with_discrete_positioner(mut self, p: Arc<dyn DiscretePositioner>) -> Self {
        self.discrete_positioner = Some(p);
        self
    }
}

// =============================================================================
// Driver Factory Trait
// =============================================================================

/// Trait for driver factories that create device instances.
///
/// Each driver crate implements this trait to register itself with the
/// registry. The factory is responsible for:
///
/// 1. Declaring what driver type it handles (matching TOML `type` field)
/// 2. Validating configuration before instantiation
/// 3. Asynchronously creating the driver and returning capabilities
///
/// Factories must not hold mutable state across builds. Shared state such as
/// a serial port used by several devices needs internal synchronization.
pub trait DriverFactory: Send + Sync + 'static {
    /// Driver type name used in TOML config `type` field.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// List of capabilities this driver type provides.
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// Validate configuration without instantiating.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Async instantiation of the driver.
    ///
    /// Builds the driver and runs its `initialize`, so the returned
    /// components are ready for use.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>>;
}
