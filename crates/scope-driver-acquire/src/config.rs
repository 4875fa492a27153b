//! Dual camera configuration.
//!
//! Deserialized from the device's `config` table:
//!
//! ```toml
//! label = "AcquireCamera"
//! demo = true
//! mode = "split"
//! poll_interval_ms = 5
//! timeout_ms = 10000
//!
//! [selection]
//! cameras = ["simulated.*random.*", "simulated.*sin.*"]
//! storage = "Trash"
//!
//! [engine]
//! seed = 42
//! ```

use crate::buffer::AcquisitionMode;
use crate::collector::FrameCollector;
use crate::session::DeviceSelection;
use crate::sim::SimulatedEngineConfig;
use anyhow::{bail, Result};
use scope_core::data::ImageGeometry;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of one dual-camera device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DualCameraConfig {
    /// Device label, also the `Name` property
    pub label: String,
    /// Use the demo frame geometry instead of the engine's
    pub demo: bool,
    /// Initial acquisition mode
    pub mode: AcquisitionMode,
    /// Engine device patterns for both streams
    pub selection: DeviceSelection,
    /// Demo frame width
    pub demo_width: u32,
    /// Demo frame height
    pub demo_height: u32,
    /// Demo pixel depth in bytes
    pub demo_bytes_per_pixel: u32,
    /// Delay between empty polls of a stream
    pub poll_interval_ms: u64,
    /// Upper bound on waiting for one frame
    pub timeout_ms: u64,
    /// Settings for the in-process engine
    pub engine: SimulatedEngineConfig,
}

impl Default for DualCameraConfig {
    fn default() -> Self {
        Self {
            label: "AcquireCamera".to_string(),
            demo: true,
            mode: AcquisitionMode::Split,
            selection: DeviceSelection::default(),
            demo_width: 640,
            demo_height: 480,
            demo_bytes_per_pixel: 1,
            poll_interval_ms: 5,
            timeout_ms: 10_000,
            engine: SimulatedEngineConfig::default(),
        }
    }
}

impl DualCameraConfig {
    /// Reject settings no engine can satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            bail!("label must not be empty");
        }
        if self.demo_width == 0 || self.demo_height == 0 {
            bail!(
                "demo geometry {}x{} must be non-zero",
                self.demo_width,
                self.demo_height
            );
        }
        if !matches!(self.demo_bytes_per_pixel, 1 | 2) {
            bail!(
                "demo_bytes_per_pixel must be 1 or 2, got {}",
                self.demo_bytes_per_pixel
            );
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be positive");
        }
        if self.timeout_ms < self.poll_interval_ms {
            bail!(
                "timeout_ms ({}) must not be shorter than poll_interval_ms ({})",
                self.timeout_ms,
                self.poll_interval_ms
            );
        }
        Ok(())
    }

    /// Per-stream frame geometry in demo mode.
    pub fn demo_geometry(&self) -> ImageGeometry {
        ImageGeometry::new(self.demo_width, self.demo_height, self.demo_bytes_per_pixel)
    }

    /// Collector with this device's poll interval and timeout.
    pub fn collector(&self) -> FrameCollector {
        FrameCollector::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_millis(self.timeout_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_demo_camera() {
        let config = DualCameraConfig::default();
        config.validate().unwrap();
        assert_eq!(config.demo_geometry(), ImageGeometry::new(640, 480, 1));
        assert_eq!(config.collector().timeout(), Duration::from_secs(10));
        assert_eq!(config.selection.storage, "Trash");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: DualCameraConfig = toml::from_str(
            r#"
            mode = "combined"
            timeout_ms = 250

            [engine]
            seed = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, AcquisitionMode::Combined);
        assert_eq!(config.collector().timeout(), Duration::from_millis(250));
        assert_eq!(config.engine.seed, Some(3));
        assert_eq!(config.label, "AcquireCamera");
    }

    #[test]
    fn rejects_bad_geometry_and_timing() {
        let config = DualCameraConfig {
            demo_bytes_per_pixel: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DualCameraConfig {
            timeout_ms: 1,
            poll_interval_ms: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
