//! Device Capabilities
//!
//! Adapters implement small, focused capability traits instead of a device
//! class hierarchy:
//!
//! - Every adapter implements [`Device`] (lifecycle) and usually
//!   [`HasProperties`] and [`HasErrorText`].
//! - A dual camera adds [`SnapCamera`] and [`ExposureControl`].
//! - An XY stage adds [`XyMovable`].
//! - A filter wheel adds [`DiscretePositioner`].
//!
//! # Design
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; adapters keep state behind interior mutability
//!
//! # Example
//!
//! ```rust,ignore
//! async fn snap_and_report<C>(camera: &C) -> Result<()>
//! where
//!     C: Device + SnapCamera,
//! {
//!     camera.initialize().await?;
//!     camera.snap().await?;
//!     for channel in 0..camera.channel_count() {
//!         if let Some(frame) = camera.frame(channel) {
//!             println!("{}: mean {:.1}", camera.channel_name(channel)?, frame.mean());
//!         }
//!     }
//!     camera.shutdown().await
//! }
//! ```

use crate::data::{Frame, ImageGeometry};
use anyhow::Result;
use async_trait::async_trait;

/// Device category for grouping in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceCategory {
    /// Cameras and imaging devices
    Camera,
    /// Motion stages
    Stage,
    /// Filter wheels and other indexed positioners
    FilterWheel,
    /// Controllers that own a shared transport
    Hub,
    /// Anything without a more specific category
    #[default]
    Other,
}

impl DeviceCategory {
    /// Heading used when listing devices by category.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Camera => "Cameras",
            Self::Stage => "Stages",
            Self::FilterWheel => "Filter Wheels",
            Self::Hub => "Hubs",
            Self::Other => "Other",
        }
    }
}

// =============================================================================
// Common capabilities
// =============================================================================

/// Capability: Lifecycle
///
/// # Contract
/// - `initialize` probes hardware and registers properties; calling it again
///   on an initialized device is a no-op
/// - `shutdown` releases hardware; calling it on a shut-down device is a no-op
#[async_trait]
pub trait Device: Send + Sync {
    /// Label the device was configured with.
    fn name(&self) -> &str;

    /// Probe the hardware and bring the device into a usable state.
    async fn initialize(&self) -> Result<()>;

    /// Release the hardware.
    async fn shutdown(&self) -> Result<()>;

    /// Whether the device is executing a command (moving, acquiring).
    async fn busy(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Capability: Named string properties
#[async_trait]
pub trait HasProperties: Send + Sync {
    /// Names of every registered property.
    fn property_names(&self) -> Vec<String>;

    /// Current value of a property.
    fn get_property(&self, name: &str) -> Result<String>;

    /// Write a property. May trigger device side effects (mode switch,
    /// controller command), hence async.
    async fn set_property(&self, name: &str, value: &str) -> Result<()>;
}

/// Capability: Error code to message lookup
pub trait HasErrorText: Send + Sync {
    /// Message for an adapter-specific error code, if the code is known.
    fn error_text(&self, code: i32) -> Option<&'static str>;
}

// =============================================================================
// Device-specific capabilities
// =============================================================================

/// Capability: Exposure Time Control
///
/// # Contract
/// - Exposure is in seconds (not milliseconds)
/// - Exposure applies to the next acquisition
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Set the exposure used by the next acquisition.
    async fn set_exposure(&self, seconds: f64) -> Result<()>;

    /// Current exposure in seconds.
    async fn get_exposure(&self) -> Result<f64>;
}

/// Capability: Single-shot multi-channel acquisition
///
/// # Contract
/// - `snap` returns once every channel holds a fresh image
/// - Geometry getters describe channel 0
/// - Channel data stays valid until the next snap or layout change
#[async_trait]
pub trait SnapCamera: Send + Sync {
    /// Acquire one image per channel.
    async fn snap(&self) -> Result<()>;

    /// Number of channels the last layout produces.
    fn channel_count(&self) -> u32;

    /// Display name of a channel.
    fn channel_name(&self, channel: u32) -> Result<String>;

    /// Geometry of channel 0.
    fn geometry(&self) -> ImageGeometry;

    /// Copy of a channel's last image, `None` for a nonexistent channel.
    fn frame(&self, channel: u32) -> Option<Frame>;
}

/// Capability: Two-axis motion control
///
/// # Contract
/// - Positions are in micrometres
/// - `move_abs` and `move_rel` initiate motion and return before completion
/// - `wait_settled` waits until the controller reports idle
#[async_trait]
pub trait XyMovable: Send + Sync {
    /// Start a move to an absolute position.
    async fn move_abs(&self, x_um: f64, y_um: f64) -> Result<()>;

    /// Start a move relative to the current position.
    async fn move_rel(&self, dx_um: f64, dy_um: f64) -> Result<()>;

    /// Current position of both axes.
    async fn position(&self) -> Result<(f64, f64)>;

    /// Wait until motion has finished.
    async fn wait_settled(&self) -> Result<()>;

    /// Halt motion on both axes.
    async fn stop(&self) -> Result<()> {
        anyhow::bail!("Stop not supported by this device")
    }

    /// Move both axes to their home positions.
    async fn home(&self) -> Result<()> {
        anyhow::bail!("Homing not supported by this device")
    }

    /// Define the current position as the origin.
    async fn set_origin(&self) -> Result<()> {
        anyhow::bail!("Set origin not supported by this device")
    }
}

/// Capability: Indexed positions (filter wheels, turrets)
///
/// Positions are zero-based.
#[async_trait]
pub trait DiscretePositioner: Send + Sync {
    /// Move to `position`.
    async fn move_to(&self, position: u32) -> Result<()>;

    /// Current position.
    async fn position(&self) -> Result<u32>;

    /// Number of positions.
    fn position_count(&self) -> u32;
}
