//! [`DriverFactory`] for the dual camera.
//!
//! ```rust,ignore
//! registry.register_factory(Box::new(DualCameraFactory));
//!
//! let config = toml::toml! {
//!     label = "AcquireCamera"
//!     mode = "split"
//! };
//! let components = factory.build(config.into()).await?;
//! ```

use crate::camera::DualCamera;
use crate::config::DualCameraConfig;
use crate::sim::SimulatedProvider;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use scope_core::capabilities::DeviceCategory;
use scope_core::driver::{Capability, DeviceComponents, DriverFactory};
use std::sync::Arc;

/// Factory for [`DualCamera`] instances backed by the in-process engine.
pub struct DualCameraFactory;

static DUAL_CAMERA_CAPABILITIES: &[Capability] = &[
    Capability::Device,
    Capability::Properties,
    Capability::ErrorText,
    Capability::ExposureControl,
    Capability::SnapCamera,
];

impl DriverFactory for DualCameraFactory {
    fn driver_type(&self) -> &'static str {
        "acquire_dual_camera"
    }

    fn name(&self) -> &'static str {
        "Acquire Dual Camera"
    }

    fn capabilities(&self) -> &'static [Capability] {
        DUAL_CAMERA_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: DualCameraConfig = config.clone().try_into()?;
        cfg.validate()
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: DualCameraConfig = config.try_into().context("Invalid dual camera config")?;
            cfg.validate()?;

            let provider = Arc::new(SimulatedProvider::new(cfg.engine.clone()));
            let camera = Arc::new(DualCamera::new(cfg, provider));
            camera.initialize().await?;

            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::Camera)
                .with_device(camera.clone())
                .with_properties(camera.clone())
                .with_error_text(camera.clone())
                .with_exposure_control(camera.clone())
                .with_snap_camera(camera))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scope_core::capabilities::{Device, SnapCamera};

    #[test]
    fn validate_rejects_bad_config() {
        let factory = DualCameraFactory;
        let good: toml::Value = toml::from_str("demo_width = 32").unwrap();
        factory.validate(&good).unwrap();

        let bad: toml::Value = toml::from_str("demo_bytes_per_pixel = 4").unwrap();
        assert!(factory.validate(&bad).is_err());

        let wrong_type: toml::Value = toml::from_str("timeout_ms = \"soon\"").unwrap();
        assert!(factory.validate(&wrong_type).is_err());
    }

    #[tokio::test]
    async fn build_returns_initialized_camera() {
        let config: toml::Value = toml::from_str(
            r#"
            demo_width = 8
            demo_height = 4
            mode = "combined"
            "#,
        )
        .unwrap();
        let components = DualCameraFactory.build(config).await.unwrap();
        assert_eq!(components.category, Some(DeviceCategory::Camera));
        assert_eq!(components.capabilities(), DUAL_CAMERA_CAPABILITIES.to_vec());

        let camera = components.snap_camera.clone().unwrap();
        assert_eq!(camera.channel_count(), 1);
        camera.snap().await.unwrap();
        assert_eq!(camera.frame(0).unwrap().data.len(), 8 * 8);

        components.device.unwrap().shutdown().await.unwrap();
    }
}
